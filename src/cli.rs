//! Interface de linha de comando do jobrunner baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (serve, demo)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// jobrunner: motor de ciclo de vida e retomada de job runs.
#[derive(Debug, Parser)]
#[command(name = "jobrunner", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./jobrunner.toml, se existir).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita logs em nível debug, ignorando o nível configurado.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Carrega job specs e processa triggers JSON do stdin até o Ctrl-C.
    Serve {
        /// Arquivo JSON ou TOML com as definições de job specs.
        #[arg(long)]
        specs: Option<PathBuf>,
    },

    /// Executa a demonstração embutida do ciclo de vida.
    Demo,
}
