use std::env;
use std::net::SocketAddr;
use std::process;

use authz_gateway::run;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let port: u16 = env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    println!("bootstrapping authz-gateway on port {port}...");

    if let Err(e) = run(addr).await {
        eprintln!("fatal error: {e:?}");
        process::exit(1);
    }
}
