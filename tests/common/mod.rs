#![allow(dead_code)]

use axum::http::{header, StatusCode};
use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const MARKETS_PAYLOAD: &str = r#"[
    {"id":"bitcoin","symbol":"btc","name":"Bitcoin","image":"https://assets.example/btc.png","current_price":64000.5,"price_change_percentage_24h":1.25,"market_cap":1260000000000,"total_volume":28000000000,"circulating_supply":19700000,"sparkline_in_7d":{"price":[63000,63500,null,64000.5]}},
    {"id":"ethereum","symbol":"eth","name":"Ethereum","image":"https://assets.example/eth.png","current_price":3100.1,"price_change_percentage_24h":-2.5,"market_cap":372000000000,"total_volume":15000000000,"circulating_supply":120000000,"sparkline_in_7d":{"price":[3150,3120,3100.1]}},
    {"id":"tether","symbol":"usdt","name":"Tether","image":"https://assets.example/usdt.png","current_price":1.0,"price_change_percentage_24h":0.01,"market_cap":110000000000,"total_volume":45000000000,"circulating_supply":110000000000,"sparkline_in_7d":null},
    {"symbol":"bad","name":"Missing Id"}
]"#;

pub struct FakeUpstream {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl FakeUpstream {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for FakeUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_upstream(status: StatusCode, body: &'static str, delay: Duration) -> FakeUpstream {
    let hits = Arc::new(AtomicUsize::new(0));
    let handler_hits = Arc::clone(&hits);

    let app = Router::new().route(
        "/coins/markets",
        get(move || {
            let hits = Arc::clone(&handler_hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                (status, [(header::CONTENT_TYPE, "application/json")], body)
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("fake upstream should bind");
    let addr = listener.local_addr().expect("listener has an address");
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    FakeUpstream {
        base_url: format!("http://{addr}"),
        hits,
        handle,
    }
}
