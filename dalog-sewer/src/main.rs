// Copyright (C) 2022-2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of dalog.
//
// dalog is free software: you can redistribute it and/or modify it under the terms of the
// GNU General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// mpdpopm is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even
// the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details.
//
// You should have received a copy of the GNU General Public License along with mpdpopm.  If not,
// see <http://www.gnu.org/licenses/>.

//! dalog-sewer -- collect raw log streams over TCP & append them to a single file.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use dalog_sewer::server::SewerServer;

#[derive(Parser, Debug)]
#[command(
    name = "dalog-sewer",
    version,
    about = "Collect raw log streams over TCP into a single file"
)]
struct Args {
    /// Port to listen on (all interfaces)
    #[arg(env = "LOGSEW_PORT")]
    port: u16,
    /// File to which every collected byte is appended (created or truncated at startup)
    #[arg(env = "LOGSEW_FILE")]
    output: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_writer(std::io::stdout).init();

    // Usage & diagnostics for a bad invocation go to stdout, as the C daemon's did.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            print!("{}", err.render());
            return ExitCode::from(err.exit_code() as u8);
        }
    };

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            error!("can't build the runtime: {}", err);
            return ExitCode::FAILURE;
        }
    };

    // All connection tasks are !Send (they share the output file handle), so the whole
    // server runs on a LocalSet pinned to this thread.
    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, async {
        let server = match SewerServer::bind(args.port, &args.output) {
            Ok(server) => server,
            Err(err) => {
                error!("{}", err);
                return ExitCode::FAILURE;
            }
        };
        match server.local_addr() {
            Ok(addr) => info!("listening on {}, collecting to {:?}", addr, args.output),
            Err(_) => info!("listening, collecting to {:?}", args.output),
        }
        server.run().await;
        ExitCode::SUCCESS
    })
}
