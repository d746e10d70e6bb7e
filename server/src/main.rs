// Copyright 2022 Ryan Seipp
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

//! CLI entry point. Builds the database pool and primes the user table
//! before the listening socket ever accepts a connection, then hands off
//! to whichever deployment (`config::Deployment`) was selected.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dbpool::{Pool, PoolConfig};

use server::config::{Config, Deployment};
use server::context::ServerContext;
use server::users::UserTable;

fn main() -> ExitCode {
    let config = Config::parse();
    server::logging::init();

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &Config) -> Result<(), server::error::StartupError> {
    let pool_config = PoolConfig {
        url: config.db_url.clone(),
        port: config.db_port,
        user: config.db_user.clone(),
        password: config.db_password.clone(),
        database: config.db_name.clone(),
        max_connections: config.db_pool_size,
    };
    let pool = Pool::connect(&pool_config)?;

    let users = UserTable::new();
    server::db::prime_users(&pool, &users)?;

    let ctx = Arc::new(ServerContext {
        doc_root: PathBuf::from(&config.doc_root),
        users,
        pool: Some(pool),
        bad_request_policy: config.bad_request_policy,
    });

    tracing::info!(
        port = config.port,
        deployment = ?config.deployment,
        doc_root = %config.doc_root,
        "starting server"
    );

    match config.deployment {
        Deployment::Threaded => server::listener::run(config, ctx),
        Deployment::MultiProcess => server::multiprocess::run(config, ctx),
    }
}
