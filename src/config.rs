//! Configuration management
//!
//! Loads service configuration from a TOML file under the platform config
//! directory, with environment-variable overrides for secrets. Missing
//! required settings are reported before the main loop starts.

use anyhow::{Result, Context, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Email delivery settings
    #[serde(default)]
    pub email: EmailConfig,
    /// Grader API settings
    #[serde(default)]
    pub grader: GraderConfig,
    /// Service loop settings
    #[serde(default)]
    pub service: ServiceConfig,
    /// Reply classification thresholds
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

/// Email delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Address of the human correspondent (required)
    #[serde(default)]
    pub target_email: String,
    /// Subject line for the quiz thread
    #[serde(default = "default_subject")]
    pub subject: String,
    /// Optional seed thread id, used when no session state exists yet
    #[serde(default)]
    pub thread_id: Option<String>,
    /// OAuth token file (obtained out-of-band via the consent flow)
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
}

fn default_subject() -> String {
    "Quiz Question".to_string()
}

fn default_token_file() -> PathBuf {
    PathBuf::from("token.json")
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            target_email: String::new(),
            subject: default_subject(),
            thread_id: None,
            token_file: default_token_file(),
        }
    }
}

/// Grader API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraderConfig {
    /// API key. Usually supplied via GRADER_API_KEY instead of the file.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model used for grading
    #[serde(default = "default_grader_model")]
    pub model: String,
    /// OpenAI-compatible chat completions base URL
    #[serde(default = "default_grader_api_base")]
    pub api_base: String,
    /// Optional review sheet whose tail is included as grading context
    #[serde(default)]
    pub review_sheet: Option<PathBuf>,
}

fn default_grader_model() -> String {
    "google/gemini-flash-1.5".to_string()
}

fn default_grader_api_base() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_grader_model(),
            api_base: default_grader_api_base(),
            review_sheet: None,
        }
    }
}

/// Service loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// CSV file with question/answer rows
    #[serde(default = "default_questions_csv")]
    pub questions_csv: PathBuf,
    /// Session state file
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Per-question score history file
    #[serde(default = "default_scores_file")]
    pub scores_file: PathBuf,
    /// Append-only graded interaction history file
    #[serde(default = "default_progress_file")]
    pub progress_file: PathBuf,
    /// Seconds between loop iterations
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Minutes between questions; the reply timeout is twice this
    #[serde(default = "default_question_interval")]
    pub question_interval_minutes: u64,
}

fn default_questions_csv() -> PathBuf {
    PathBuf::from("questions.csv")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("state.json")
}

fn default_scores_file() -> PathBuf {
    PathBuf::from("scores.json")
}

fn default_progress_file() -> PathBuf {
    PathBuf::from("progress.json")
}

fn default_poll_interval() -> u64 {
    30
}

fn default_question_interval() -> u64 {
    10
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            questions_csv: default_questions_csv(),
            state_file: default_state_file(),
            scores_file: default_scores_file(),
            progress_file: default_progress_file(),
            poll_interval_secs: default_poll_interval(),
            question_interval_minutes: default_question_interval(),
        }
    }
}

/// Reply classification thresholds
///
/// Defaults are tuned against Gmail's quoting and auto-reply behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Messages within this window after a send are treated as delivery races
    #[serde(default = "default_reply_buffer_ms")]
    pub reply_buffer_ms: i64,
    /// Replies arriving faster than this are assumed automated
    #[serde(default = "default_auto_reply_cutoff_ms")]
    pub auto_reply_cutoff_ms: i64,
    /// Minimum length of a cleaned reply body
    #[serde(default = "default_min_reply_chars")]
    pub min_reply_chars: usize,
    /// Word overlap with the question above this ratio means a quoted echo
    #[serde(default = "default_max_question_overlap")]
    pub max_question_overlap: f64,
}

fn default_reply_buffer_ms() -> i64 {
    2_000
}

fn default_auto_reply_cutoff_ms() -> i64 {
    10_000
}

fn default_min_reply_chars() -> usize {
    3
}

fn default_max_question_overlap() -> f64 {
    0.8
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            reply_buffer_ms: default_reply_buffer_ms(),
            auto_reply_cutoff_ms: default_auto_reply_cutoff_ms(),
            min_reply_chars: default_min_reply_chars(),
            max_question_overlap: default_max_question_overlap(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            email: EmailConfig::default(),
            grader: GraderConfig::default(),
            service: ServiceConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, applying environment overrides
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            toml::from_str(&contents)
                .context("Failed to parse config file")?
        } else {
            let config = Config::default();
            config.save()?;
            config
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path.parent()
            .context("Config path has no parent")?;

        std::fs::create_dir_all(parent)
            .context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Environment variables win over file contents for secrets and the
    /// correspondent address, so the config file never has to hold them.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("GRADER_API_KEY") {
            if !key.is_empty() {
                self.grader.api_key = Some(key);
            }
        }
        if let Ok(addr) = std::env::var("TARGET_EMAIL") {
            if !addr.is_empty() {
                self.email.target_email = addr;
            }
        }
    }

    /// Validate required settings. Called once before the loop starts;
    /// failures here are fatal.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.email.target_email.trim().is_empty() {
            errors.push("email.target_email is required (or set TARGET_EMAIL)".to_string());
        }
        if self.grader.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            errors.push("grader.api_key is required (or set GRADER_API_KEY)".to_string());
        }
        let token_file = self.token_path()?;
        if !token_file.exists() {
            errors.push(format!("OAuth token file not found: {}", token_file.display()));
        }
        let questions = self.questions_path()?;
        if !questions.exists() {
            errors.push(format!("Questions CSV file not found: {}", questions.display()));
        }

        if !errors.is_empty() {
            bail!(
                "Configuration errors:\n{}",
                errors.iter().map(|e| format!("  - {e}")).collect::<Vec<_>>().join("\n")
            );
        }
        Ok(())
    }

    /// The seed thread id, with empty strings normalized away
    pub fn seed_thread_id(&self) -> Option<String> {
        self.email.thread_id.as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
    }

    pub fn questions_path(&self) -> Result<PathBuf> {
        resolve_data_path(&self.service.questions_csv)
    }

    pub fn state_path(&self) -> Result<PathBuf> {
        resolve_data_path(&self.service.state_file)
    }

    pub fn scores_path(&self) -> Result<PathBuf> {
        resolve_data_path(&self.service.scores_file)
    }

    pub fn progress_path(&self) -> Result<PathBuf> {
        resolve_data_path(&self.service.progress_file)
    }

    pub fn token_path(&self) -> Result<PathBuf> {
        resolve_data_path(&self.email.token_file)
    }

    pub fn review_sheet_path(&self) -> Result<Option<PathBuf>> {
        match &self.grader.review_sheet {
            Some(path) => Ok(Some(resolve_data_path(path)?)),
            None => Ok(None),
        }
    }
}

/// Relative paths live under the data directory; absolute paths are kept as-is
fn resolve_data_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(data_dir()?.join(path))
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "mailquiz", "mailquiz")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "mailquiz", "mailquiz")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

/// Show current configuration with secrets elided
pub fn show_config() -> Result<()> {
    let config = Config::load()?;

    println!("Configuration ({})", config_path()?.display());
    println!("  target email:       {}", if config.email.target_email.is_empty() { "<unset>" } else { &config.email.target_email });
    println!("  subject:            {}", config.email.subject);
    println!("  seed thread id:     {}", config.seed_thread_id().as_deref().unwrap_or("<none>"));
    println!("  grader model:       {}", config.grader.model);
    println!("  grader api base:    {}", config.grader.api_base);
    println!("  grader api key:     {}", if config.grader.api_key.is_some() { "configured" } else { "<unset>" });
    println!("  questions csv:      {}", config.questions_path()?.display());
    println!("  state file:         {}", config.state_path()?.display());
    println!("  scores file:        {}", config.scores_path()?.display());
    println!("  progress file:      {}", config.progress_path()?.display());
    println!("  poll interval:      {}s", config.service.poll_interval_secs);
    println!("  question interval:  {}m", config.service.question_interval_minutes);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.email.subject, "Quiz Question");
        assert_eq!(config.service.poll_interval_secs, 30);
        assert_eq!(config.service.question_interval_minutes, 10);
        assert_eq!(config.classifier.reply_buffer_ms, 2_000);
        assert_eq!(config.classifier.auto_reply_cutoff_ms, 10_000);
        assert_eq!(config.classifier.min_reply_chars, 3);
        assert!((config.classifier.max_question_overlap - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_seed_thread_id_normalizes_empty() {
        let mut config = Config::default();
        config.email.thread_id = Some("   ".to_string());
        assert_eq!(config.seed_thread_id(), None);

        config.email.thread_id = Some(" 18c2a4f9d1e0b7a3 ".to_string());
        assert_eq!(config.seed_thread_id().as_deref(), Some("18c2a4f9d1e0b7a3"));
    }

    #[test]
    fn test_validate_reports_missing_settings() {
        let config = Config::default();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("target_email"));
        assert!(err.contains("api_key"));
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            "[email]\ntarget_email = \"student@example.com\"\n\n[service]\npoll_interval_secs = 5\n",
        )
        .unwrap();
        assert_eq!(config.email.target_email, "student@example.com");
        assert_eq!(config.service.poll_interval_secs, 5);
        // Untouched sections keep their defaults
        assert_eq!(config.service.question_interval_minutes, 10);
        assert_eq!(config.classifier.reply_buffer_ms, 2_000);
    }
}
