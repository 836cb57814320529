use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::fetch::ClientConfig;

const DEFAULT_CONFIG: &str = "welfare.toml";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// One region's ordered seed list.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedGroup {
    pub region: String,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub delay_ms: u64,
    pub seeds: Vec<SeedGroup>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: PathBuf::from("data/welfare.sqlite"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 10,
            delay_ms: 1000,
            seeds: default_seeds(),
        }
    }
}

impl Settings {
    /// Layered load: optional TOML file, then `WELFARE_*` environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = path.unwrap_or(DEFAULT_CONFIG);
        let settings = Config::builder()
            .add_source(File::with_name(file).required(path.is_some()))
            .add_source(Environment::with_prefix("WELFARE").try_parsing(true))
            .build()
            .with_context(|| format!("Failed to load settings from {}", file))?;
        let settings: Settings = settings
            .try_deserialize()
            .context("Invalid settings")?;
        Ok(settings)
    }

    pub fn client(&self) -> ClientConfig {
        ClientConfig {
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            delay: Duration::from_millis(self.delay_ms),
        }
    }

    /// Seeds flattened to (url, region) in configured order, optionally for one region.
    pub fn seed_list(&self, region: Option<&str>) -> Vec<(String, String)> {
        self.seeds
            .iter()
            .filter(|g| region.map_or(true, |r| g.region == r))
            .flat_map(|g| g.urls.iter().map(|u| (u.clone(), g.region.clone())))
            .collect()
    }
}

fn default_seeds() -> Vec<SeedGroup> {
    vec![
        SeedGroup {
            region: "서울".into(),
            urls: vec![
                "https://wis.seoul.go.kr/wfs/ywf/sickMan.do".into(),
                "https://wis.seoul.go.kr/wfs/ywf/selfReliance.do".into(),
                "https://wis.seoul.go.kr/wfs/ywf/saveAccnt.do".into(),
            ],
        },
        SeedGroup {
            region: "인천".into(),
            urls: vec![
                "https://youth.incheon.go.kr/youthpolicy/youthPolicyInfoDetail.do?poly_seq=379&pgno=1".into(),
                "https://youth.incheon.go.kr/youthpolicy/youthPolicyInfoDetail.do?poly_seq=346&menudiv=financial".into(),
                "https://youth.incheon.go.kr/youthpolicy/youthPolicyInfoDetail.do?poly_seq=304&menudiv=financial".into(),
                "https://youth.incheon.go.kr/youthpolicy/youthPolicyInfoDetail.do?poly_seq=23&menudiv=financial".into(),
                "https://youth.incheon.go.kr/youthpolicy/youthPolicyInfoDetail.do?poly_seq=277&empmst=006003".into(),
            ],
        },
        SeedGroup {
            region: "경기".into(),
            urls: vec!["https://youth.gg.go.kr/gg/intro/youth-policy-job-test.do".into()],
        },
    ]
}
