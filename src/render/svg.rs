use std::fmt::Write;

/// CJK-capable fonts first; viewers pick the first one installed.
pub const FONT_FAMILY: &str = "'Noto Sans CJK TC', 'Noto Sans TC', 'Noto Sans CJK JP', \
'Noto Sans CJK SC', 'PingFang TC', 'Microsoft JhengHei', 'Arial Unicode MS', \
'WenQuanYi Micro Hei', 'DejaVu Sans', sans-serif";

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Start,
    Middle,
    End,
}

impl Anchor {
    fn as_str(self) -> &'static str {
        match self {
            Anchor::Start => "start",
            Anchor::Middle => "middle",
            Anchor::End => "end",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TextStyle<'a> {
    pub size: f64,
    pub color: &'a str,
    pub anchor: Anchor,
    pub bold: bool,
    /// Degrees, around the text origin.
    pub rotate: f64,
}

impl Default for TextStyle<'_> {
    fn default() -> Self {
        Self {
            size: 12.0,
            color: "#333333",
            anchor: Anchor::Start,
            bold: false,
            rotate: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Stroke<'a> {
    pub color: &'a str,
    pub width: f64,
    pub dash: Option<&'a str>,
    pub opacity: f64,
}

impl<'a> Stroke<'a> {
    pub fn solid(color: &'a str, width: f64) -> Self {
        Self {
            color,
            width,
            dash: None,
            opacity: 1.0,
        }
    }

    pub fn dashed(color: &'a str, width: f64, dash: &'a str) -> Self {
        Self {
            color,
            width,
            dash: Some(dash),
            opacity: 1.0,
        }
    }

    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity;
        self
    }

    fn attrs(&self) -> String {
        let mut s = format!(
            r#"stroke="{}" stroke-width="{:.2}""#,
            self.color, self.width
        );
        if let Some(d) = self.dash {
            let _ = write!(s, r#" stroke-dasharray="{}""#, d);
        }
        if self.opacity < 1.0 {
            let _ = write!(s, r#" stroke-opacity="{:.2}""#, self.opacity);
        }
        s
    }
}

fn points_attr(points: &[(f64, f64)]) -> String {
    points
        .iter()
        .map(|(x, y)| format!("{:.2},{:.2}", x, y))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Append-only SVG document.
pub struct Svg {
    buf: String,
}

impl Svg {
    pub fn new(width: f64, height: f64) -> Self {
        let mut buf = String::with_capacity(16 * 1024);
        let _ = writeln!(buf, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        let _ = writeln!(
            buf,
            r#"<svg xmlns="http://www.w3.org/2000/svg" version="1.1" width="{w:.0}" height="{h:.0}" viewBox="0 0 {w:.0} {h:.0}" font-family="{f}">"#,
            w = width,
            h = height,
            f = FONT_FAMILY
        );
        let _ = writeln!(
            buf,
            r##"<rect x="0" y="0" width="{:.0}" height="{:.0}" fill="#ffffff"/>"##,
            width, height
        );
        Self { buf }
    }

    pub fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, stroke: Stroke<'_>) {
        let _ = writeln!(
            self.buf,
            r#"<line x1="{:.2}" y1="{:.2}" x2="{:.2}" y2="{:.2}" {}/>"#,
            x1,
            y1,
            x2,
            y2,
            stroke.attrs()
        );
    }

    pub fn rect(&mut self, x: f64, y: f64, w: f64, h: f64, fill: &str, stroke: Option<Stroke<'_>>) {
        let _ = writeln!(
            self.buf,
            r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" fill="{}"{}/>"#,
            x,
            y,
            w,
            h,
            fill,
            stroke.map(|s| format!(" {}", s.attrs())).unwrap_or_default()
        );
    }

    pub fn polyline(&mut self, points: &[(f64, f64)], stroke: Stroke<'_>) {
        if points.len() < 2 {
            return;
        }
        let _ = writeln!(
            self.buf,
            r#"<polyline points="{}" fill="none" stroke-linejoin="round" {}/>"#,
            points_attr(points),
            stroke.attrs()
        );
    }

    pub fn polygon(&mut self, points: &[(f64, f64)], fill: &str, opacity: f64) {
        if points.len() < 3 {
            return;
        }
        let _ = writeln!(
            self.buf,
            r#"<polygon points="{}" fill="{}" fill-opacity="{:.2}" stroke="none"/>"#,
            points_attr(points),
            fill,
            opacity
        );
    }

    pub fn circle(&mut self, cx: f64, cy: f64, r: f64, fill: &str) {
        let _ = writeln!(
            self.buf,
            r#"<circle cx="{:.2}" cy="{:.2}" r="{:.2}" fill="{}"/>"#,
            cx, cy, r, fill
        );
    }

    pub fn text(&mut self, x: f64, y: f64, content: &str, style: TextStyle<'_>) {
        let mut attrs = format!(
            r#"x="{:.2}" y="{:.2}" font-size="{:.1}" fill="{}" text-anchor="{}""#,
            x,
            y,
            style.size,
            style.color,
            style.anchor.as_str()
        );
        if style.bold {
            attrs.push_str(r#" font-weight="bold""#);
        }
        if style.rotate != 0.0 {
            let _ = write!(
                attrs,
                r#" transform="rotate({:.1} {:.2} {:.2})""#,
                style.rotate, x, y
            );
        }
        let _ = writeln!(self.buf, "<text {}>{}</text>", attrs, escape(content));
    }

    pub fn finish(mut self) -> String {
        self.buf.push_str("</svg>\n");
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_escaped() {
        assert_eq!(escape(r#"A&B <c> "d" 'e'"#), "A&amp;B &lt;c&gt; &quot;d&quot; &apos;e&apos;");
        let mut svg = Svg::new(100.0, 50.0);
        svg.text(10.0, 20.0, "最新：<113Q4>", TextStyle::default());
        let out = svg.finish();
        assert!(out.contains("最新：&lt;113Q4&gt;"));
        assert!(out.trim_end().ends_with("</svg>"));
    }

    #[test]
    fn document_has_white_background() {
        let out = Svg::new(1200.0, 600.0).finish();
        assert!(out.contains(r##"<rect x="0" y="0" width="1200" height="600" fill="#ffffff"/>"##));
        assert!(out.contains(r#"viewBox="0 0 1200 600""#));
    }

    #[test]
    fn degenerate_shapes_are_skipped() {
        let mut svg = Svg::new(10.0, 10.0);
        svg.polyline(&[(0.0, 0.0)], Stroke::solid("#000", 1.0));
        svg.polygon(&[(0.0, 0.0), (1.0, 1.0)], "#000", 0.5);
        let out = svg.finish();
        assert!(!out.contains("<polyline"));
        assert!(!out.contains("<polygon"));
    }

    #[test]
    fn dashed_stroke_attributes() {
        let mut svg = Svg::new(10.0, 10.0);
        svg.line(0.0, 1.0, 10.0, 1.0, Stroke::dashed("#d62728", 1.5, "6 4").with_opacity(0.8));
        let out = svg.finish();
        assert!(out.contains(r#"stroke-dasharray="6 4""#));
        assert!(out.contains(r#"stroke-opacity="0.80""#));
    }
}
