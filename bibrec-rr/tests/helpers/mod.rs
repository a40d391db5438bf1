//! Shared helpers for bibrec-rr integration tests
//!
//! Provides an in-process HTTP server standing in for the DBLP and Crossref
//! APIs, plus canonical fixture files.

#![allow(dead_code)]

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Start `router` on an ephemeral local port and return its base URL
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test server");
    let addr = listener.local_addr().expect("local address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server");
    });
    format!("http://{}", addr)
}

/// Base URL of a port nothing listens on
pub async fn unreachable_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind unused port");
    let addr = listener.local_addr().expect("local address");
    drop(listener);
    format!("http://{}", addr)
}

/// Requests seen by a mock server
#[derive(Clone, Default)]
pub struct Recorded {
    pub queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    pub fetches: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

/// DBLP stand-in answering every search with `body` and `status`
pub fn dblp_router(status: StatusCode, body: &'static str, recorded: Recorded) -> Router {
    Router::new()
        .route(
            "/search/publ/api",
            get(
                move |State(recorded): State<Recorded>,
                      Query(params): Query<HashMap<String, String>>| async move {
                    recorded.queries.lock().unwrap().push(params);
                    (status, body)
                },
            ),
        )
        .with_state(recorded)
}

/// Crossref stand-in
///
/// `records` maps a DOI to the BibTeX returned for it; any other DOI answers
/// 500. The search returns `search_dois` in order.
pub fn crossref_router(
    search_status: StatusCode,
    search_dois: Vec<&'static str>,
    records: HashMap<&'static str, &'static str>,
    recorded: Recorded,
) -> Router {
    let items: Vec<Value> = search_dois.iter().map(|doi| json!({ "DOI": doi })).collect();
    let search_body = json!({ "status": "ok", "message": { "items": items } });
    let records = Arc::new(records);

    Router::new()
        .route(
            "/works",
            get(
                move |State(recorded): State<Recorded>,
                      Query(params): Query<HashMap<String, String>>| async move {
                    recorded.queries.lock().unwrap().push(params);
                    (search_status, Json(search_body))
                },
            ),
        )
        .route(
            "/works/:doi/transform",
            get(
                move |State(recorded): State<Recorded>, Path(doi): Path<String>, headers: HeaderMap| {
                    let records = records.clone();
                    async move {
                        let accept = headers
                            .get("accept")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        recorded.fetches.lock().unwrap().push((doi.clone(), accept));
                        match records.get(doi.as_str()) {
                            Some(body) => (StatusCode::OK, body.to_string()),
                            None => (StatusCode::INTERNAL_SERVER_ERROR, String::new()),
                        }
                    }
                },
            ),
        )
        .with_state(recorded)
}

/// Crossref stand-in with response latency
///
/// The search waits `search_delay` and returns the DOIs of `records` in order;
/// each record fetch waits its own delay before answering.
pub fn delayed_crossref_router(
    search_delay: Duration,
    records: Vec<(&'static str, &'static str, Duration)>,
) -> Router {
    let items: Vec<Value> = records.iter().map(|(doi, _, _)| json!({ "DOI": doi })).collect();
    let search_body = json!({ "status": "ok", "message": { "items": items } });
    let records: Arc<HashMap<&'static str, (&'static str, Duration)>> = Arc::new(
        records
            .into_iter()
            .map(|(doi, body, delay)| (doi, (body, delay)))
            .collect(),
    );

    Router::new()
        .route(
            "/works",
            get(move || {
                let body = search_body.clone();
                async move {
                    tokio::time::sleep(search_delay).await;
                    Json(body)
                }
            }),
        )
        .route(
            "/works/:doi/transform",
            get(move |Path(doi): Path<String>| {
                let records = records.clone();
                async move {
                    match records.get(doi.as_str()) {
                        Some((body, delay)) => {
                            tokio::time::sleep(*delay).await;
                            (StatusCode::OK, body.to_string())
                        }
                        None => (StatusCode::NOT_FOUND, String::new()),
                    }
                }
            }),
        )
}

/// Canonical bibliography used by the end-to-end tests
pub const CANONICAL_BIB: &str = r#"@inproceedings{devlin-etal-2019-bert,
    title = "{BERT}: Pre-training of Deep Bidirectional Transformers for Language Understanding",
    author = "Devlin, Jacob and Chang, Ming-Wei and Lee, Kenton and Toutanova, Kristina",
    booktitle = "Proceedings of the 2019 Conference of the North American Chapter of the Association for Computational Linguistics",
    year = "2019",
    pages = "4171--4186",
}

@inproceedings{vaswani2017attention,
    title = {Attention is All you Need},
    author = {Vaswani, Ashish and others},
    booktitle = {Advances in Neural Information Processing Systems},
    year = {2017},
}
"#;

/// User bibliography used by the end-to-end tests
pub const INPUT_BIB: &str = r#"@article{devlin2018bert,
  title={BERT: Pre-training of Deep Bidirectional Transformers for Language Understanding},
  author={Devlin, Jacob and Chang, Ming-Wei and Lee, Kenton and Toutanova, Kristina},
  journal={arXiv preprint arXiv:1810.04805},
  year={2018}
}

@article{vaswani,
  title={Attention is All you Need},
  author={Vaswani, Ashish},
  journal={CoRR},
  year={2017}
}

@misc{roberta,
  title={RoBERTa: A Robustly Optimized BERT Pretraining Approach},
  author={Liu, Yinhan and others},
  url={https://arxiv.org/abs/1907.11692},
}

@book{knuth,
  title={The Art of Computer Programming},
  author={Knuth, Donald},
  year={1968},
}
"#;
