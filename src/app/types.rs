use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use url::Url;

use super::error::{FillError, Result};

pub const DEFAULT_BASE_URL: &str = "https://ar.computrabajo.com";
pub const DEFAULT_USER_AGENT: &str = concat!(
    "jobfill/",
    env!("CARGO_PKG_VERSION"),
    " (saved listing description filler)"
);

#[derive(Debug, Parser, Clone)]
#[command(
    name = "jobfill",
    version,
    about = "Fill saved job-listing snapshots with descriptions scraped from their detail pages"
)]
pub struct Cli {
    #[arg(long, value_name = "DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Defaults to <DATA_DIR>/ofertas_detalle
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    #[arg(long, value_name = "PREFIX", default_value = "buenos_aires_p")]
    pub prefix: String,

    #[arg(long, value_name = "EXT", default_value = "html")]
    pub extension: String,

    #[arg(long, value_enum, default_value_t = RewriteMode::Inline)]
    pub mode: RewriteMode,

    #[arg(long, value_name = "N", default_value_t = 20)]
    pub max_fetch: usize,

    #[arg(long, default_value_t = false)]
    pub no_fetch_limit: bool,

    #[arg(long, value_name = "MS", default_value_t = 2000)]
    pub delay_ms: u64,

    #[arg(long, value_name = "SECS", default_value_t = 25)]
    pub timeout_secs: u64,

    #[arg(long, value_name = "URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    #[arg(long, value_name = "UA")]
    pub user_agent: Option<String>,

    /// JSON site profile overriding markers, selectors and heuristic settings
    #[arg(long, value_name = "FILE")]
    pub profile: Option<PathBuf>,

    #[arg(short, long, value_name = "FILE")]
    pub report: Option<String>,

    #[arg(long, value_enum, default_value_t = FileFormatArg::Csv)]
    pub format: FileFormatArg,

    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
pub enum RewriteMode {
    /// Hidden description block inside every card plus the expansion script
    Inline,
    /// Shared detail panel filled from the selected card
    Panel,
}

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
pub enum FileFormatArg {
    Csv,
    Json,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Json,
}

impl From<FileFormatArg> for DataFormat {
    fn from(value: FileFormatArg) -> Self {
        match value {
            FileFormatArg::Csv => DataFormat::Csv,
            FileFormatArg::Json => DataFormat::Json,
        }
    }
}

/// A detail-page reference with its fragment removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    pub fn from_href(href: &str) -> Option<Self> {
        let trimmed = href.trim();
        let base = trimmed
            .split_once('#')
            .map_or(trimmed, |(before, _)| before);
        if base.is_empty() {
            None
        } else {
            Some(Self(base.to_string()))
        }
    }

    pub fn from_detail_href(href: &str, marker: &str) -> Option<Self> {
        if !href.trim().contains(marker) {
            return None;
        }
        Self::from_href(href)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn cache_file_name(&self) -> String {
        let stem = self
            .0
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || ch == '_' {
                    ch
                } else {
                    '_'
                }
            })
            .collect::<String>();
        format!("{stem}.html")
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    First,
    Last,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicConfig {
    pub container_selector: String,
    pub min_chars: usize,
    pub denylist: Vec<String>,
    pub tie_break: TieBreak,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            container_selector: "div".to_string(),
            min_chars: 300,
            denylist: vec!["cookies".to_string(), "política de privacidad".to_string()],
            tie_break: TieBreak::First,
        }
    }
}

/// Keyword lists handed to the injected expansion script as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentationRules {
    pub detail_box_selector: String,
    pub detail_selector: String,
    pub loading_selector: String,
    pub heading_keywords: Vec<String>,
    pub fact_keywords: Vec<String>,
    pub fact_max_chars: usize,
}

impl Default for PresentationRules {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|w| w.to_string()).collect::<Vec<_>>();
        Self {
            detail_box_selector: "[data-offers-grid-box-detail]".to_string(),
            detail_selector: "[data-offers-grid-detail-container]".to_string(),
            loading_selector: "[data-offers-grid-loading-container]".to_string(),
            heading_keywords: words(&[
                "Descripción",
                "Responsabilidades",
                "Requisitos",
                "Principales",
                "Perfil",
                "La empresa ofrece",
                "Funciones",
                "Sobre",
                "Requerimientos",
            ]),
            fact_keywords: words(&[
                "A convenir",
                "Jornada",
                "Contrato",
                "Presencial",
                "Eventual",
                "Indeterminado",
                "Completa",
                "Turnos",
                "Part time",
            ]),
            fact_max_chars: 25,
        }
    }
}

/// Markers and selectors of one listing site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteProfile {
    pub link_marker: String,
    pub card_selector: String,
    pub selected_class: String,
    pub title_selector: String,
    pub supporting_selector: String,
    pub header_line_max_chars: usize,
    pub description_class: String,
    pub asset_attribute: String,
    pub panel_selector: String,
    pub panel_body_class: String,
    pub accept_language: String,
    pub heuristic: HeuristicConfig,
    pub presentation: PresentationRules,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            link_marker: "/ofertas-de-trabajo/oferta-de-trabajo-de-".to_string(),
            card_selector: "article.box_offer".to_string(),
            selected_class: "sel".to_string(),
            title_selector: "h2".to_string(),
            supporting_selector: "p".to_string(),
            header_line_max_chars: 120,
            description_class: "descripcion_scrapeada".to_string(),
            asset_attribute: "data-custom-ofertas".to_string(),
            panel_selector: ".box_detail".to_string(),
            panel_body_class: "box_detail_body".to_string(),
            accept_language: "es-AR,es;q=0.9,en;q=0.8".to_string(),
            heuristic: HeuristicConfig::default(),
            presentation: PresentationRules::default(),
        }
    }
}

impl SiteProfile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(FillError::at(path))?;
        let profile = serde_json::from_str::<SiteProfile>(&raw).map_err(|source| {
            FillError::Profile {
                path: path.to_path_buf(),
                source,
            }
        })?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn selected_class_selector(&self) -> String {
        format!(".{}", self.selected_class)
    }

    pub fn description_selector(&self) -> String {
        format!("div.{}", self.description_class)
    }

    pub fn asset_selector(&self, tag: &str) -> String {
        format!("{tag}[{}]", self.asset_attribute)
    }

    pub fn panel_body_selector(&self) -> String {
        format!(".{}", self.panel_body_class)
    }

    /// Rejects selectors either HTML engine would refuse, before any file is touched.
    pub fn validate(&self) -> Result<()> {
        let scraped = [
            ("card_selector", self.card_selector.clone()),
            ("selected_class", self.selected_class_selector()),
            ("title_selector", self.title_selector.clone()),
            ("supporting_selector", self.supporting_selector.clone()),
            ("panel_selector", self.panel_selector.clone()),
            ("panel_body_class", self.panel_body_selector()),
            (
                "heuristic.container_selector",
                self.heuristic.container_selector.clone(),
            ),
        ];
        for (field, selector) in scraped {
            if scraper::Selector::parse(&selector).is_err() {
                return Err(FillError::Selector { field, selector });
            }
        }

        let streamed = [
            ("card_selector", self.card_selector.clone()),
            ("description_class", self.description_selector()),
            ("asset_attribute", self.asset_selector("style")),
            ("panel_selector", self.panel_selector.clone()),
            ("panel_body_class", self.panel_body_selector()),
        ];
        for (field, selector) in streamed {
            if selector.parse::<lol_html::Selector>().is_err() {
                return Err(FillError::Selector { field, selector });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub prefix: String,
    pub extension: String,
    pub mode: RewriteMode,
    pub fetch_limit: Option<usize>,
    pub delay: Duration,
    pub timeout: Duration,
    pub base_url: Url,
    pub user_agent: String,
    pub profile: SiteProfile,
    pub report: Option<(String, DataFormat)>,
}

impl RunConfig {
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        let base_url = parse_base_url(DEFAULT_BASE_URL)?;
        Ok(Self {
            cache_dir: data_dir.join("ofertas_detalle"),
            data_dir,
            prefix: "buenos_aires_p".to_string(),
            extension: "html".to_string(),
            mode: RewriteMode::Inline,
            fetch_limit: Some(20),
            delay: Duration::from_millis(2000),
            timeout: Duration::from_secs(25),
            base_url,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            profile: SiteProfile::default(),
            report: None,
        })
    }

    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let profile = match cli.profile.as_deref() {
            Some(path) => SiteProfile::load(path)?,
            None => SiteProfile::default(),
        };
        let configured_format: DataFormat = cli.format.into();
        let report = cli
            .report
            .clone()
            .map(|path| {
                let format = detect_data_format(&path, configured_format);
                (path, format)
            });

        Ok(Self {
            cache_dir: cli
                .cache_dir
                .clone()
                .unwrap_or_else(|| cli.data_dir.join("ofertas_detalle")),
            data_dir: cli.data_dir.clone(),
            prefix: cli.prefix.clone(),
            extension: cli.extension.trim_start_matches('.').to_string(),
            mode: cli.mode,
            fetch_limit: (!cli.no_fetch_limit).then_some(cli.max_fetch),
            delay: Duration::from_millis(cli.delay_ms),
            timeout: Duration::from_secs(cli.timeout_secs.max(1)),
            base_url: parse_base_url(&cli.base_url)?,
            user_agent: cli
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            profile,
            report,
        })
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    Url::parse(raw.trim()).map_err(|err| FillError::BaseUrl(raw.to_string(), err))
}

pub fn detect_data_format(path: &str, fallback: DataFormat) -> DataFormat {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".json") {
        DataFormat::Json
    } else if lower.ends_with(".csv") {
        DataFormat::Csv
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_drops_fragment_and_whitespace() {
        let id = Identifier::from_href("  /ofertas-de-trabajo/oferta-de-trabajo-de-x-123#lc=ListOffers-Score-5 ")
            .unwrap();
        assert_eq!(id.as_str(), "/ofertas-de-trabajo/oferta-de-trabajo-de-x-123");
        assert!(Identifier::from_href("#top").is_none());
        assert!(Identifier::from_href("   ").is_none());
    }

    #[test]
    fn detail_href_requires_marker() {
        let marker = "/ofertas-de-trabajo/oferta-de-trabajo-de-";
        assert!(Identifier::from_detail_href("/empleos-en-mendoza?p=2", marker).is_none());
        assert!(Identifier::from_detail_href("/ofertas-de-trabajo/oferta-de-trabajo-de-cajero-1", marker).is_some());
    }

    #[test]
    fn cache_file_name_replaces_unsafe_characters() {
        let id = Identifier::from_href("/ofertas-de-trabajo/oferta-de-trabajo-de-ñandú_1?x=y").unwrap();
        assert_eq!(
            id.cache_file_name(),
            "_ofertas_de_trabajo_oferta_de_trabajo_de__and__1_x_y.html"
        );
    }

    #[test]
    fn default_profile_is_valid() {
        SiteProfile::default().validate().unwrap();
    }

    #[test]
    fn broken_selector_is_rejected() {
        let profile = SiteProfile {
            card_selector: "article[".to_string(),
            ..SiteProfile::default()
        };
        let err = profile.validate().unwrap_err();
        assert!(matches!(err, FillError::Selector { field: "card_selector", .. }));
    }

    #[test]
    fn card_selector_lists_are_accepted() {
        let profile = SiteProfile {
            card_selector: "article.box_offer, li.job".to_string(),
            ..SiteProfile::default()
        };
        profile.validate().unwrap();
        assert_eq!(profile.selected_class_selector(), ".sel");
        assert_eq!(profile.panel_body_selector(), ".box_detail_body");
    }

    #[test]
    fn partial_profile_keeps_defaults() {
        let profile: SiteProfile =
            serde_json::from_str(r#"{"link_marker": "/job/", "heuristic": {"min_chars": 120}}"#)
                .unwrap();
        assert_eq!(profile.link_marker, "/job/");
        assert_eq!(profile.heuristic.min_chars, 120);
        assert_eq!(profile.heuristic.container_selector, "div");
        assert_eq!(profile.card_selector, "article.box_offer");
    }

    #[test]
    fn report_format_follows_extension() {
        assert_eq!(detect_data_format("out.JSON", DataFormat::Csv), DataFormat::Json);
        assert_eq!(detect_data_format("out.txt", DataFormat::Json), DataFormat::Json);
    }
}
