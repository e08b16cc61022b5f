//! Configuração do motor carregada a partir de `jobrunner.toml`.
//!
//! A struct [`EngineConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults, e as variáveis de
//! ambiente `JOBRUNNER_*` têm precedência sobre o arquivo.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::builder::RunPolicy;

pub const CONFIG_FILE: &str = "jobrunner.toml";

/// Configuração de nível superior carregada de `jobrunner.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Piso aplicado às confirmações exigidas por cada tarefa.
    #[serde(default)]
    pub minimum_confirmations: u64,

    /// Runs cujo pagamento fica abaixo deste valor nascem com erro.
    #[serde(default)]
    pub minimum_contract_payment: u64,

    /// Quantas vezes uma escrita otimista perdida é retentada por run.
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,

    /// Nível de log usado quando `RUST_LOG` não está definido.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Valor padrão para retentativas de conflito: 3.
fn default_max_conflict_retries() -> u32 {
    3
}

// Valor padrão para o nível de log: "info".
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            minimum_confirmations: 0,
            minimum_contract_payment: 0,
            max_conflict_retries: default_max_conflict_retries(),
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Carrega `jobrunner.toml` do diretório atual, ou os defaults se o
    /// arquivo não existir.
    pub fn load() -> Result<Self> {
        let path = Path::new(CONFIG_FILE);
        let config = if path.exists() {
            Self::read_file(path)?
        } else {
            Self::default()
        };
        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Carrega um arquivo de configuração explícito, que precisa existir.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::read_file(path)?.with_env_overrides(|key| std::env::var(key).ok())
    }

    fn read_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str::<EngineConfig>(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Aplica os overrides `JOBRUNNER_*`. Valores vazios são ignorados.
    fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = var("JOBRUNNER_MIN_CONFIRMATIONS") {
            self.minimum_confirmations = v
                .parse()
                .with_context(|| format!("JOBRUNNER_MIN_CONFIRMATIONS is not a number: {v}"))?;
        }
        if let Some(v) = var("JOBRUNNER_MIN_PAYMENT") {
            self.minimum_contract_payment = v
                .parse()
                .with_context(|| format!("JOBRUNNER_MIN_PAYMENT is not a number: {v}"))?;
        }
        if let Some(v) = var("JOBRUNNER_LOG") {
            self.log_level = v;
        }
        Ok(self)
    }

    pub fn run_policy(&self) -> RunPolicy {
        RunPolicy {
            minimum_confirmations: self.minimum_confirmations,
            minimum_contract_payment: self.minimum_contract_payment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let config = EngineConfig::default();
        assert_eq!(config.minimum_confirmations, 0);
        assert_eq!(config.minimum_contract_payment, 0);
        assert_eq!(config.max_conflict_retries, 3);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            minimum_confirmations = 6
            log_level = "debug"
        "#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.minimum_confirmations, 6);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.max_conflict_retries, 3);
        assert_eq!(config.minimum_contract_payment, 0);
    }

    #[test]
    fn env_overrides_win_over_file() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("JOBRUNNER_MIN_CONFIRMATIONS", "12"),
            ("JOBRUNNER_MIN_PAYMENT", "1000"),
            ("JOBRUNNER_LOG", ""),
        ]);
        let config = EngineConfig::default()
            .with_env_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.minimum_confirmations, 12);
        assert_eq!(config.minimum_contract_payment, 1000);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn bad_env_value_is_an_error() {
        let result = EngineConfig::default().with_env_overrides(|k| {
            (k == "JOBRUNNER_MIN_CONFIRMATIONS").then(|| "lots".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn load_from_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_conflict_retries = 7\nminimum_contract_payment = 5").unwrap();
        let config = EngineConfig::read_file(file.path()).unwrap();
        assert_eq!(config.max_conflict_retries, 7);
        assert_eq!(config.run_policy().minimum_contract_payment, 5);
    }

    #[test]
    fn load_from_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EngineConfig::load_from(&dir.path().join("nope.toml")).is_err());
    }
}
