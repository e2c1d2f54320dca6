// src/config.rs

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_BASE_URL: &str = "https://pip.moi.gov.tw/Publicize/Info/E3030";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Top-level run configuration. Every field has a default, so an empty YAML
/// document (or no file at all) yields the two built-in datasets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub data_dir: PathBuf,
    pub svg_dir: PathBuf,
    pub report_dir: PathBuf,
    pub history_dir: PathBuf,
    pub readme: PathBuf,
    pub http: HttpConfig,
    pub browser: BrowserConfig,
    pub datasets: Vec<DatasetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub accept_language: String,
    pub page_timeout_secs: u64,
    pub export_timeout_secs: u64,
    /// Scraping attempts after the direct export fails.
    pub attempts: u32,
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Render the data page with a headless browser instead of a plain GET.
    pub enabled: bool,
    pub binary: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

/// A group of interchangeable substrings worth `weight` points when any of
/// them appears in a link's surrounding text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkKeyword {
    pub any: Vec<String>,
    pub weight: i32,
}

impl LinkKeyword {
    fn new(any: &[&str], weight: i32) -> Self {
        Self {
            any: any.iter().map(|s| s.to_string()).collect(),
            weight,
        }
    }
}

/// How regional rows are combined when no nationwide row exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    #[default]
    Sum,
    Mean,
}

/// Explicit column names, bypassing keyword detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub period: String,
    #[serde(default)]
    pub region: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Threshold {
    pub value: f64,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChartConfig {
    /// Single nationwide line with filled area.
    Trend,
    /// One panel per region.
    RegionPanels {
        regions: Vec<String>,
        #[serde(default)]
        threshold: Option<Threshold>,
        /// Fixed upper bound for every panel; auto-scaled when absent.
        #[serde(default)]
        y_max: Option<f64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadmeSection {
    pub header: String,
    pub image_alt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub id: String,
    pub title: String,
    /// Name of the dataset as listed on the source page.
    pub target_name: String,
    #[serde(default)]
    pub link_keywords: Vec<LinkKeyword>,
    #[serde(default = "default_min_link_score")]
    pub min_link_score: i32,
    #[serde(default)]
    pub export_url: Option<String>,
    pub csv_file: String,
    pub svg_file: String,
    pub report_file: String,
    #[serde(default)]
    pub value_keywords: Vec<String>,
    #[serde(default)]
    pub columns: Option<ColumnMapping>,
    #[serde(default)]
    pub aggregate: Aggregate,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub decimals: usize,
    pub chart: ChartConfig,
    #[serde(default = "default_x_label")]
    pub x_label: String,
    #[serde(default)]
    pub y_label: String,
    #[serde(default)]
    pub readme: Option<ReadmeSection>,
}

fn default_min_link_score() -> i32 {
    30
}

fn default_x_label() -> String {
    "期別".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: "zh-TW,zh;q=0.9,en-US;q=0.8,en;q=0.7".to_string(),
            page_timeout_secs: 30,
            export_timeout_secs: 60,
            attempts: 3,
            accept_invalid_certs: true,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            binary: "google-chrome".to_string(),
            args: Vec::new(),
            timeout_secs: 45,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            data_dir: PathBuf::from("data/csv"),
            svg_dir: PathBuf::from("data/svg"),
            report_dir: PathBuf::from("data/reports"),
            history_dir: PathBuf::from("data/history"),
            readme: PathBuf::from("README.md"),
            http: HttpConfig::default(),
            browser: BrowserConfig::default(),
            datasets: vec![transfer_count_dataset(), default_rate_dataset()],
        }
    }
}

fn transfer_count_dataset() -> DatasetConfig {
    DatasetConfig {
        id: "transfer-count".to_string(),
        title: "全台建物買賣移轉棟數".to_string(),
        target_name: "建物買賣移轉登記棟數".to_string(),
        link_keywords: vec![
            LinkKeyword::new(&["建物買賣移轉登記棟數"], 100),
            LinkKeyword::new(&["建物買賣移轉棟數"], 60),
            LinkKeyword::new(&["買賣移轉"], 30),
            LinkKeyword::new(&["建物"], 15),
            LinkKeyword::new(&["移轉"], 15),
            LinkKeyword::new(&["棟數"], 15),
            LinkKeyword::new(&["全台", "全國"], 8),
            LinkKeyword::new(&["csv"], 10),
            LinkKeyword::new(&[".xls"], 8),
        ],
        min_link_score: default_min_link_score(),
        export_url: Some(format!("{DEFAULT_BASE_URL}?do=export&t=4&k=1&n=3")),
        csv_file: "taiwan_building_transfer_count.csv".to_string(),
        svg_file: "taiwan_building_transfer_count.svg".to_string(),
        report_file: "taiwan_building_transfer_monitor.md".to_string(),
        value_keywords: vec![
            "建物買賣移轉棟數".to_string(),
            "移轉棟數".to_string(),
            "棟數".to_string(),
        ],
        columns: None,
        aggregate: Aggregate::Sum,
        unit: "棟".to_string(),
        decimals: 0,
        chart: ChartConfig::Trend,
        x_label: default_x_label(),
        y_label: "棟數".to_string(),
        readme: Some(ReadmeSection {
            header: "### 資料視覺化- 全台建物買賣移轉棟數".to_string(),
            image_alt: "全台建物買賣移轉棟數".to_string(),
        }),
    }
}

fn default_rate_dataset() -> DatasetConfig {
    DatasetConfig {
        id: "default-rate".to_string(),
        title: "六都購置住宅貸款違約率".to_string(),
        target_name: "本季購置住宅貸款違約率".to_string(),
        link_keywords: vec![
            LinkKeyword::new(&["本季購置住宅貸款違約率"], 100),
            LinkKeyword::new(&["購置住宅貸款違約率"], 60),
            LinkKeyword::new(&["違約率"], 30),
            LinkKeyword::new(&["住宅貸款"], 15),
            LinkKeyword::new(&["csv"], 10),
        ],
        min_link_score: default_min_link_score(),
        export_url: None,
        csv_file: "housing_loan_default_rate.csv".to_string(),
        svg_file: "six_cities_default_rate.svg".to_string(),
        report_file: "housing_loan_default_rate_monitor.md".to_string(),
        value_keywords: vec![
            "購置住宅貸款違約率".to_string(),
            "違約率".to_string(),
            "率".to_string(),
            "rate".to_string(),
        ],
        columns: None,
        aggregate: Aggregate::Mean,
        unit: "%".to_string(),
        decimals: 2,
        chart: ChartConfig::RegionPanels {
            regions: ["臺北市", "新北市", "桃園市", "臺中市", "臺南市", "高雄市"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            threshold: Some(Threshold {
                value: 0.3,
                label: "警戒值 0.30%".to_string(),
            }),
            y_max: None,
        },
        x_label: "季別".to_string(),
        y_label: "違約率 (%)".to_string(),
        readme: Some(ReadmeSection {
            header: "### 資料視覺化- 六都購置住宅貸款違約率".to_string(),
            image_alt: "六都購置住宅貸款違約率".to_string(),
        }),
    }
}

impl Config {
    /// Load from `path` when given, otherwise fall back to the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cfg = match path {
            Some(p) => {
                let text = fs::read_to_string(p)
                    .with_context(|| format!("reading config {}", p.display()))?;
                serde_yaml::from_str::<Config>(&text)
                    .with_context(|| format!("parsing config {}", p.display()))?
            }
            None => Config::default(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.datasets.is_empty() {
            bail!("no datasets configured");
        }
        let mut ids = HashSet::new();
        for ds in &self.datasets {
            if !ids.insert(ds.id.as_str()) {
                bail!("duplicate dataset id `{}`", ds.id);
            }
        }
        Ok(())
    }

    pub fn dataset(&self, id: &str) -> Option<&DatasetConfig> {
        self.datasets.iter().find(|d| d.id == id)
    }

    pub fn csv_path(&self, ds: &DatasetConfig) -> PathBuf {
        self.data_dir.join(&ds.csv_file)
    }

    pub fn svg_path(&self, ds: &DatasetConfig) -> PathBuf {
        self.svg_dir.join(&ds.svg_file)
    }

    pub fn report_path(&self, ds: &DatasetConfig) -> PathBuf {
        self.report_dir.join(&ds.report_file)
    }

    /// Create every output directory the pipeline writes into.
    pub fn ensure_dirs(&self) -> Result<()> {
        for d in [
            &self.data_dir,
            &self.svg_dir,
            &self.report_dir,
            &self.history_dir,
        ] {
            fs::create_dir_all(d).with_context(|| format!("creating {}", d.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_both_datasets() {
        let cfg = Config::load(None).unwrap();
        assert!(cfg.dataset("transfer-count").is_some());
        assert!(cfg.dataset("default-rate").is_some());
        let ds = cfg.dataset("transfer-count").unwrap();
        assert_eq!(
            cfg.csv_path(ds),
            PathBuf::from("data/csv/taiwan_building_transfer_count.csv")
        );
    }

    #[test]
    fn yaml_overrides_merge_with_defaults() {
        let yaml = r#"
data_dir: out/csv
http:
  attempts: 5
datasets:
  - id: counts
    title: Counts
    target_name: 建物買賣移轉登記棟數
    csv_file: counts.csv
    svg_file: counts.svg
    report_file: counts.md
    aggregate: mean
    columns:
      period: 年月
      value: 棟數
    chart:
      kind: region_panels
      regions: [臺北市]
      y_max: 2.5
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("out/csv"));
        assert_eq!(cfg.http.attempts, 5);
        assert_eq!(cfg.http.page_timeout_secs, 30);
        assert_eq!(cfg.datasets.len(), 1);
        let ds = &cfg.datasets[0];
        assert_eq!(ds.aggregate, Aggregate::Mean);
        assert_eq!(ds.min_link_score, 30);
        assert_eq!(ds.x_label, "期別");
        assert!(ds.columns.as_ref().unwrap().region.is_none());
        match &ds.chart {
            ChartConfig::RegionPanels { regions, y_max, .. } => {
                assert_eq!(regions, &vec!["臺北市".to_string()]);
                assert_eq!(*y_max, Some(2.5));
            }
            other => panic!("unexpected chart {:?}", other),
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut cfg = Config::default();
        let dup = cfg.datasets[0].clone();
        cfg.datasets.push(dup);
        assert!(cfg.validate().is_err());
    }
}
