use clap::{CommandFactory, Parser};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ReportError, Result};
use crate::period;
use crate::provider::{ExportPolicy, Provider};

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Monthly cloud-billing export processor
#[derive(Parser, Debug, Clone)]
#[command(
    name = "billing-report",
    about = "Cleans a monthly cloud-billing export and writes per-customer workbooks",
    version
)]
pub struct Settings {
    /// Billing export file to process
    #[arg(value_name = "FILE")]
    pub input: PathBuf,

    /// Cloud provider that produced the export
    #[arg(long, value_parser = ["azure", "tencent"])]
    pub provider: String,

    /// Root directory for generated workbooks
    #[arg(long, default_value = "reports")]
    pub output_root: PathBuf,

    /// Export policy (defaults to the provider's usual policy)
    #[arg(long, value_parser = ["append", "timestamped"])]
    pub policy: Option<String>,

    /// Timezone the reporting period is computed in (auto-detected if not specified)
    #[arg(long, default_value = "auto")]
    pub timezone: String,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Clear saved configuration before running
    #[arg(long)]
    pub clear: bool,
}

// ── LastUsedParams ─────────────────────────────────────────────────────────────

/// Persisted last-used parameters saved to `~/.billing-report/last_used.json`.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct LastUsedParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

impl LastUsedParams {
    /// Return the default path to the persisted config file.
    /// Uses `~/.billing-report/last_used.json`.
    pub fn config_path() -> PathBuf {
        Self::config_path_in(&dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    /// Return the config path rooted at `base_dir` (used for testing).
    pub fn config_path_in(base_dir: &std::path::Path) -> PathBuf {
        base_dir.join(".billing-report").join("last_used.json")
    }

    /// Load persisted params from the default path.
    /// Returns `Default` when the file is absent or cannot be parsed.
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load persisted params from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    /// Atomically write params to the default path, creating parent directories
    /// if needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Atomically write params to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;

        // Write to a temp file then rename for atomicity.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;

        Ok(())
    }

    /// Delete the default config file if it exists.
    pub fn clear() -> Result<()> {
        Self::clear_at(&Self::config_path())
    }

    /// Delete the config file at an explicit path if it exists.
    pub fn clear_at(path: &std::path::Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse CLI arguments, merge with last-used params where no explicit CLI
    /// value was provided, resolve `"auto"` values, and persist the result.
    pub fn load_with_last_used() -> Self {
        Self::load_with_last_used_impl(
            std::env::args_os().collect(),
            &LastUsedParams::config_path(),
        )
    }

    /// Full implementation, accepting args and an explicit config path so
    /// that tests can redirect to a temporary directory.
    pub fn load_with_last_used_impl(
        args: Vec<std::ffi::OsString>,
        config_path: &std::path::Path,
    ) -> Self {
        // Build raw ArgMatches so we can query ValueSource.
        let matches = Settings::command().get_matches_from(args.clone());

        // Parse into the typed struct using the same args.
        let mut settings = Settings::parse_from(args);

        if settings.clear {
            let _ = LastUsedParams::clear_at(config_path);
            // Resolve auto values and return without re-persisting.
            return Self::resolve_auto_values(settings);
        }

        let last = LastUsedParams::load_from(config_path);

        // Merge last-used values for fields that were NOT explicitly set on the
        // command line (CLI always wins).  'provider' and the input file are
        // per-run intent and never loaded from last-used.
        // NOTE: clap stores the arg id using the *field name* (underscores),
        // not the long-flag spelling (hyphens).
        if !is_arg_explicitly_set(&matches, "output_root") {
            if let Some(v) = last.output_root {
                settings.output_root = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "timezone") {
            if let Some(v) = last.timezone {
                settings.timezone = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "policy") && settings.policy.is_none() {
            settings.policy = last.policy;
        }

        settings = Self::resolve_auto_values(settings);

        // Persist current settings for next run.
        let params = LastUsedParams::from(&settings);
        let _ = params.save_to(config_path);

        settings
    }

    /// Resolve `"auto"` sentinel values and apply the `--debug` flag.
    fn resolve_auto_values(mut settings: Settings) -> Settings {
        // Resolve "auto" timezone → system timezone.
        if settings.timezone.eq_ignore_ascii_case("auto") {
            settings.timezone = period::get_system_timezone();
        }

        // --debug overrides log level.
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }

        settings
    }

    /// Convert parsed settings into the immutable per-run configuration the
    /// pipeline consumes.
    ///
    /// Validates that the input file exists and resolves the provider and the
    /// effective export policy.
    pub fn to_run_config(&self) -> Result<RunConfig> {
        let provider = self.provider.parse::<Provider>()?;

        if !self.input.is_file() {
            return Err(ReportError::format(&self.input, "file not found"));
        }

        let policy = match &self.policy {
            Some(name) => name.parse::<ExportPolicy>()?,
            None => provider.schema().default_policy,
        };

        Ok(RunConfig {
            provider,
            input: self.input.clone(),
            output_root: self.output_root.clone(),
            policy,
            timezone: period::resolve_timezone(&self.timezone),
        })
    }
}

// ── RunConfig ──────────────────────────────────────────────────────────────────

/// Immutable configuration for exactly one pipeline run.
///
/// Built once by the binary from [`Settings`] and threaded through the
/// pipeline; nothing downstream mutates it.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Provider whose schema drives every stage.
    pub provider: Provider,
    /// The billing export file to process.
    pub input: PathBuf,
    /// Root directory receiving per-provider output subdirectories.
    pub output_root: PathBuf,
    /// Effective export policy after any CLI override.
    pub policy: ExportPolicy,
    /// Timezone the reporting period and run timestamp are computed in.
    pub timezone: Tz,
}

impl RunConfig {
    /// Directory this run's workbooks land in:
    /// `<output-root>/<provider-subdir>/`.
    pub fn output_dir(&self) -> PathBuf {
        self.output_root.join(self.provider.schema().output_subdir)
    }
}

// ── Conversion ─────────────────────────────────────────────────────────────────

impl From<&Settings> for LastUsedParams {
    fn from(s: &Settings) -> Self {
        LastUsedParams {
            output_root: Some(s.output_root.clone()),
            timezone: Some(s.timezone.clone()),
            policy: s.policy.clone(),
        }
    }
}

// ── Helper: check if an arg was explicitly set on the command line ─────────────

/// Returns `true` when `name` was supplied explicitly on the command line
/// (not via default value or environment variable).
fn is_arg_explicitly_set(matches: &clap::ArgMatches, name: &str) -> bool {
    matches.value_source(name) == Some(clap::parser::ValueSource::CommandLine)
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// Build the config path inside `tmp`.
    fn tmp_config_path(tmp: &TempDir) -> PathBuf {
        LastUsedParams::config_path_in(tmp.path())
    }

    /// Save `params` to `tmp`, then load them back.
    fn round_trip(tmp: &TempDir, params: &LastUsedParams) -> LastUsedParams {
        let path = tmp_config_path(tmp);
        params.save_to(&path).expect("save");
        LastUsedParams::load_from(&path)
    }

    /// Minimal valid argument list; every parse needs a provider and a file.
    fn base_args() -> Vec<std::ffi::OsString> {
        vec![
            "billing-report".into(),
            "--provider".into(),
            "azure".into(),
            "bill.xlsx".into(),
        ]
    }

    fn args_with(extra: &[&str]) -> Vec<std::ffi::OsString> {
        let mut args = base_args();
        for a in extra {
            args.push(a.into());
        }
        args
    }

    // ── LastUsedParams persistence ───────────────────────────────────────────

    #[test]
    fn test_last_used_params_save_load() {
        let tmp = TempDir::new().expect("tempdir");
        let params = LastUsedParams {
            output_root: Some(PathBuf::from("/srv/reports")),
            timezone: Some("Europe/Berlin".to_string()),
            policy: Some("timestamped".to_string()),
        };

        let loaded = round_trip(&tmp, &params);

        assert_eq!(loaded.output_root, Some(PathBuf::from("/srv/reports")));
        assert_eq!(loaded.timezone, Some("Europe/Berlin".to_string()));
        assert_eq!(loaded.policy, Some("timestamped".to_string()));
    }

    #[test]
    fn test_last_used_params_clear() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp_config_path(&tmp);

        let params = LastUsedParams {
            timezone: Some("UTC".to_string()),
            ..Default::default()
        };
        params.save_to(&path).expect("save");
        assert!(path.exists(), "file must exist after save");

        LastUsedParams::clear_at(&path).expect("clear");
        assert!(!path.exists(), "file must be gone after clear");
    }

    #[test]
    fn test_last_used_params_default_when_missing() {
        let tmp = TempDir::new().expect("tempdir");
        let loaded = LastUsedParams::load_from(&tmp_config_path(&tmp));
        assert!(loaded.output_root.is_none());
        assert!(loaded.timezone.is_none());
        assert!(loaded.policy.is_none());
    }

    // ── Settings parsing ─────────────────────────────────────────────────────

    #[test]
    fn test_settings_default_values() {
        let settings = Settings::parse_from(base_args());

        assert_eq!(settings.input, PathBuf::from("bill.xlsx"));
        assert_eq!(settings.provider, "azure");
        assert_eq!(settings.output_root, PathBuf::from("reports"));
        assert!(settings.policy.is_none());
        assert_eq!(settings.timezone, "auto");
        assert_eq!(settings.log_level, "INFO");
        assert!(settings.log_file.is_none());
        assert!(!settings.debug);
        assert!(!settings.clear);
    }

    #[test]
    fn test_settings_cli_policy_override() {
        let settings = Settings::parse_from(args_with(&["--policy", "timestamped"]));
        assert_eq!(settings.policy.as_deref(), Some("timestamped"));
    }

    #[test]
    fn test_settings_cli_log_file() {
        let settings = Settings::parse_from(args_with(&["--log-file", "/tmp/report.log"]));
        assert_eq!(settings.log_file, Some(PathBuf::from("/tmp/report.log")));
    }

    // ── From<&Settings> for LastUsedParams ───────────────────────────────────

    #[test]
    fn test_from_settings_to_last_used() {
        let mut settings = Settings::parse_from(args_with(&["--timezone", "Asia/Taipei"]));
        settings.output_root = PathBuf::from("/data/out");

        let last = LastUsedParams::from(&settings);

        assert_eq!(last.output_root, Some(PathBuf::from("/data/out")));
        assert_eq!(last.timezone, Some("Asia/Taipei".to_string()));
        assert!(last.policy.is_none());
        // 'provider' is NOT stored in LastUsedParams.
    }

    // ── load_with_last_used (uses config path injection) ─────────────────────

    #[test]
    fn test_load_with_last_used_merges_persisted_output_root() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);

        let params = LastUsedParams {
            output_root: Some(PathBuf::from("/srv/reports")),
            timezone: Some("UTC".to_string()),
            ..Default::default()
        };
        params.save_to(&config_path).expect("save");

        // Parse without --output-root → should use persisted value.
        let settings = Settings::load_with_last_used_impl(base_args(), &config_path);
        assert_eq!(settings.output_root, PathBuf::from("/srv/reports"));
    }

    #[test]
    fn test_load_with_last_used_cli_overrides_persisted() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);

        let params = LastUsedParams {
            output_root: Some(PathBuf::from("/srv/reports")),
            timezone: Some("UTC".to_string()),
            ..Default::default()
        };
        params.save_to(&config_path).expect("save");

        // Explicit --output-root on CLI must win.
        let settings = Settings::load_with_last_used_impl(
            args_with(&["--output-root", "/cli/out"]),
            &config_path,
        );
        assert_eq!(settings.output_root, PathBuf::from("/cli/out"));
    }

    #[test]
    fn test_load_with_last_used_clear_removes_file() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);

        let params = LastUsedParams {
            timezone: Some("UTC".to_string()),
            ..Default::default()
        };
        params.save_to(&config_path).expect("save");
        assert!(config_path.exists(), "file must exist before clear");

        Settings::load_with_last_used_impl(args_with(&["--clear"]), &config_path);

        assert!(!config_path.exists(), "file must be gone after --clear");
    }

    #[test]
    fn test_load_with_last_used_debug_overrides_log_level() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);

        let settings =
            Settings::load_with_last_used_impl(args_with(&["--debug"]), &config_path);
        assert_eq!(settings.log_level, "DEBUG");
    }

    #[test]
    fn test_load_with_last_used_resolves_auto_timezone() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);

        let settings = Settings::load_with_last_used_impl(base_args(), &config_path);
        assert_ne!(settings.timezone, "auto");
        assert!(!settings.timezone.is_empty());
    }

    #[test]
    fn test_load_with_last_used_persists_after_run() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);

        Settings::load_with_last_used_impl(
            args_with(&["--output-root", "/kept/out"]),
            &config_path,
        );

        assert!(
            config_path.exists(),
            "config file must be persisted after run"
        );
        let loaded = LastUsedParams::load_from(&config_path);
        assert_eq!(loaded.output_root, Some(PathBuf::from("/kept/out")));
    }

    // ── to_run_config ────────────────────────────────────────────────────────

    fn settings_for_existing_file(tmp: &TempDir, extra: &[&str]) -> Settings {
        let input = tmp.path().join("bill.xlsx");
        std::fs::write(&input, b"stub").expect("write input");
        let mut args = vec![
            "billing-report".into(),
            "--provider".into(),
            "azure".into(),
        ];
        for a in extra {
            args.push(std::ffi::OsString::from(a));
        }
        args.push(input.into_os_string());
        Settings::parse_from(args)
    }

    #[test]
    fn test_to_run_config_uses_provider_default_policy() {
        let tmp = TempDir::new().expect("tempdir");
        let settings = settings_for_existing_file(&tmp, &[]);
        let config = settings.to_run_config().expect("run config");
        assert_eq!(config.provider, Provider::Azure);
        assert_eq!(config.policy, ExportPolicy::Append);
    }

    #[test]
    fn test_to_run_config_policy_override() {
        let tmp = TempDir::new().expect("tempdir");
        let settings = settings_for_existing_file(&tmp, &["--policy", "timestamped"]);
        let config = settings.to_run_config().expect("run config");
        assert_eq!(config.policy, ExportPolicy::Timestamped);
    }

    #[test]
    fn test_to_run_config_missing_input_is_format_error() {
        let settings = Settings::parse_from(args_with(&[]));
        let err = settings.to_run_config().unwrap_err();
        assert!(matches!(err, ReportError::Format { .. }));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_output_dir_joins_provider_subdir() {
        let tmp = TempDir::new().expect("tempdir");
        let mut settings = settings_for_existing_file(&tmp, &[]);
        settings.output_root = PathBuf::from("/srv/reports");

        let config = settings.to_run_config().expect("run config");
        assert_eq!(config.output_dir(), PathBuf::from("/srv/reports/azure"));
    }
}
