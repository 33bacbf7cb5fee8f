// Copyright 2025 Qubership Monitoring Operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::{Parser, Subcommand};
use monitoring_operator::certs::ETCD_SECRET_NAME;
use monitoring_operator::{crd, refresh_etcd_certs, run};
use shadow_rs::shadow;

shadow!(build);

#[derive(Parser)]
#[command(name = "monitoring-op")]
#[command(about = "Platform monitoring Kubernetes operator", long_about = None)]
#[command(version = build::CLAP_LONG_VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Output CRDs in YAML
    Crd {
        /// Optional output path. If not set, the output will be written to stdout.
        #[arg(short, long)]
        file: Option<String>,
    },

    /// Run the controller
    Server {},

    /// Refresh the etcd client certificates once and exit
    EtcdCerts {
        /// Secret the certificates are written to
        #[arg(long, default_value = ETCD_SECRET_NAME)]
        secret: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Crd { file } => crd(file).await?,
        Commands::Server {} => run().await?,
        Commands::EtcdCerts { secret } => refresh_etcd_certs(secret).await?,
    }

    Ok(())
}
