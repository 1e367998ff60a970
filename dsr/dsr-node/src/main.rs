// Copyright 2026 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! GWLB DSR gateway and relay node.

use anyhow::Context;
use clap::Parser;
use dsr_node::{
    Cli, Command, GatewayConfig, RelayConfig,
    runtime::{run_gateway, run_relay},
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let result = match cli.command {
        Command::Gateway(args) => {
            let config = GatewayConfig::try_from(args)?;
            runtime.block_on(run_gateway(config))
        }
        Command::Relay(args) => {
            let config = RelayConfig::try_from(args)?;
            runtime.block_on(run_relay(config))
        }
    };
    if let Err(e) = &result {
        tracing::error!(error=%e, "Node failed");
    }
    Ok(result?)
}
