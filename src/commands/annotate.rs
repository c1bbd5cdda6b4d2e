use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::bus;
use crate::dom::fixture::{build_node, PageFixture, ScriptedMutation};
use crate::dom::{Document, NodeId};
use crate::services::{PageSession, PriceClient, PriceResponder};
use crate::utils::Config;

/// Settle time after the last scripted mutation before the page is printed
const SETTLE_MARGIN: Duration = Duration::from_millis(50);

/// Run both halves in-process over a page fixture and print the result
pub async fn execute(config: &Config, path: &Path) -> Result<(), String> {
    info!("📝 Annotate command called for {}", path.display());
    let fixture = PageFixture::load(path)?;
    let (document, body) = fixture.build().map_err(|e| format!("Invalid page: {}", e))?;
    let document = Arc::new(Mutex::new(document));

    let (cache, _store) = super::open_cache(config).await?;
    let (page_end, background_end) = bus::channel();
    let responder = PriceResponder::new(cache).serve(background_end);
    let client = Arc::new(PriceClient::connect(page_end));

    let session = PageSession::load(client, document.clone(), &config.page, config.display.clone()).await;
    if let Some(e) = session.load_error() {
        warn!("No price data on load ({}), waiting for page changes to retry", e);
    }

    let mutations = fixture.mutations.clone();
    if !mutations.is_empty() {
        apply_mutations(&document, body, mutations).await?;
        tokio::time::sleep(config.page.debounce + SETTLE_MARGIN).await;
    }

    let rendered = {
        let doc = document.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        doc.render(body)
    };
    let initial = session.initial_stats();
    let later = session.watcher_stats();
    println!("{}", rendered);
    let outcome = match session.snapshot() {
        Some(snapshot) => {
            println!(
                "\n1 BTC = ${} ({}) | {} annotations on load, {} after mutations",
                snapshot.usd_rate(),
                snapshot.source(),
                initial.annotations,
                later.annotations
            );
            Ok(())
        }
        None => Err(match session.load_error() {
            Some(e) => format!("Could not get price data: {}", e),
            None => "Could not get price data".to_string(),
        }),
    };

    session.close().await;
    responder.abort();
    outcome
}

/// Append each scripted node to the body at its offset from now
async fn apply_mutations(
    document: &Arc<Mutex<Document>>,
    body: NodeId,
    mut mutations: Vec<ScriptedMutation>,
) -> Result<(), String> {
    mutations.sort_by_key(|m| m.after_ms);
    let start = Instant::now();

    for mutation in mutations {
        sleep_until(start + Duration::from_millis(mutation.after_ms)).await;
        let mut doc = document.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let node = build_node(&mut doc, &mutation.append).map_err(|e| format!("Invalid mutation: {}", e))?;
        doc.append_child(body, node).map_err(|e| format!("Invalid mutation: {}", e))?;
        debug!("Applied scripted mutation at +{}ms", mutation.after_ms);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::fixture::NodeSpec;

    #[tokio::test(start_paused = true)]
    async fn test_mutations_are_applied_in_order() {
        let mut document = Document::new();
        let root = document.root();
        let body = document.create_element("body");
        document.append_child(root, body).unwrap();
        let document = Arc::new(Mutex::new(document));

        let mutations = vec![
            ScriptedMutation {
                after_ms: 200,
                append: NodeSpec::Text(" second".to_string()),
            },
            ScriptedMutation {
                after_ms: 100,
                append: NodeSpec::Text("first".to_string()),
            },
        ];
        apply_mutations(&document, body, mutations).await.unwrap();
        assert_eq!(document.lock().unwrap().text_content(body), "first second");
    }
}
