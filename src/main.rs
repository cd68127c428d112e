// dkimsend – DKIM signing and submission of email messages
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use dkimsend::{
    config::{Args, Config},
    send,
    transport::SmtpTransport,
};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dkimsend=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::try_from(Args::parse()) {
        Ok(config) => config,
        Err(e) => {
            println!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let transport = SmtpTransport::new(config.server.clone(), Some(config.timeout));

    match send::send(&config, &transport).await {
        Ok(_) => {
            println!("mail sent successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}", send::format_error_chain(&e));
            ExitCode::FAILURE
        }
    }
}
