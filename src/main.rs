use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use log::{info, warn};
use warp::Filter;

use market_chat::config::Settings;
use market_chat::directory::{Fixtures, MemoryAccounts, MemoryStatements, TokenTable};
use market_chat::server::{routes, ChatServer};

fn tls_ready(cert_path: &str, key_path: &str) -> bool {
    let cert_file = match File::open(cert_path) {
        Ok(file) => file,
        Err(e) => {
            warn!("cannot open certificate file {cert_path}: {e}");
            return false;
        }
    };
    let key_file = match File::open(key_path) {
        Ok(file) => file,
        Err(e) => {
            warn!("cannot open private key file {key_path}: {e}");
            return false;
        }
    };

    let certs: Vec<_> = match rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<_, _>>()
    {
        Ok(certs) => certs,
        Err(e) => {
            warn!("cannot parse certificate {cert_path}: {e}");
            return false;
        }
    };
    let keys: Vec<_> = match rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(key_file))
        .collect::<Result<_, _>>()
    {
        Ok(keys) => keys,
        Err(e) => {
            warn!("cannot parse private key {key_path}: {e}");
            return false;
        }
    };

    !certs.is_empty() && !keys.is_empty()
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let settings = Settings::from_env();

    let accounts = Arc::new(MemoryAccounts::default());
    let statements = Arc::new(MemoryStatements::default());
    let identities = Arc::new(TokenTable::default());

    if let Some(path) = &settings.fixtures_path {
        match Fixtures::load(path) {
            Ok(fixtures) => {
                fixtures.apply(&accounts, &statements, &identities).await;
                info!("loaded fixtures from {path}");
            }
            Err(e) => warn!("could not load fixtures from {path}: {e}"),
        }
    }

    let server = Arc::new(ChatServer::new(
        settings.clone(),
        accounts,
        statements,
        identities,
    ));

    let routes = routes(server).with(warp::cors().allow_any_origin());

    if tls_ready(&settings.tls_cert_path, &settings.tls_key_path) {
        info!("starting secure server (wss) on {}", settings.bind);
        warp::serve(routes)
            .tls()
            .cert_path(&settings.tls_cert_path)
            .key_path(&settings.tls_key_path)
            .run(settings.bind)
            .await;
    } else {
        info!("TLS material unavailable, serving plain websockets on {}", settings.bind);
        warp::serve(routes).run(settings.bind).await;
    }
}
