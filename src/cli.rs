//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using the
//! `clap` crate. These arguments are parsed at startup and then merged, with
//! the highest priority, over the `enrollwatch.toml` file and environment
//! variables.

use clap::Parser;
use figment::{
    value::{Dict, Map, Tag, Value},
    Error, Metadata, Profile, Provider,
};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Sends a Telegram alert for every new student registration in Firestore.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// The logging level (e.g. "info", "debug").
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// The Firestore collection to watch.
    #[arg(long, value_name = "NAME")]
    pub collection: Option<String>,

    /// Address for the liveness endpoint.
    #[arg(long, value_name = "ADDR")]
    pub listen_address: Option<SocketAddr>,

    /// Host and port of a Firestore emulator.
    #[arg(long, value_name = "HOST:PORT")]
    pub emulator_host: Option<String>,

    /// Expose Prometheus metrics on `/metrics`.
    #[arg(long)]
    pub metrics: bool,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        let mut firestore = Dict::new();
        if let Some(collection) = &self.collection {
            firestore.insert("collection".into(), Value::from(collection.clone()));
        }
        if let Some(host) = &self.emulator_host {
            firestore.insert("emulator_host".into(), Value::from(host.clone()));
        }

        let mut liveness = Dict::new();
        if let Some(addr) = self.listen_address {
            liveness.insert("listen_address".into(), Value::from(addr.to_string()));
        }

        // A bare flag can only switch metrics on; absence keeps the file value.
        let mut metrics = Dict::new();
        if self.metrics {
            metrics.insert("enabled".into(), Value::from(true));
        }

        for (section, values) in [("firestore", firestore), ("liveness", liveness), ("metrics", metrics)] {
            if !values.is_empty() {
                dict.insert(section.into(), Value::Dict(Tag::Default, values));
            }
        }

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
