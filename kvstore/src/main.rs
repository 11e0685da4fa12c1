use std::{env, fs::File, io, num::NonZeroUsize, sync::Arc};

use graph::Graph;
use kvstore::{EmbeddingStore, KvServer, StoreConfig, StoreHandle};
use log::info;
use tokio::{net::TcpListener, signal};

const DEFAULT_HOST: &str = "127.0.0.1";

fn store_config() -> io::Result<StoreConfig> {
    let mut config = StoreConfig::default();

    if let Ok(shards) = env::var("KV_SHARDS") {
        config.shards = shards
            .parse::<NonZeroUsize>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("KV_SHARDS: {e}")))?;
    }

    Ok(config)
}

fn load_graph() -> io::Result<Option<Arc<Graph>>> {
    let Ok(path) = env::var("KV_GRAPH") else {
        return Ok(None);
    };

    let file = File::open(&path)?;
    let graph = Graph::read_edge_list(io::BufReader::new(file)).map_err(io::Error::other)?;
    info!(nodes = graph.num_nodes(), edges = graph.num_edges(); "loaded graph from {path}");

    Ok(Some(Arc::new(graph)))
}

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let addr = format!(
        "{}:{}",
        env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
        env::var("PORT").map_err(io::Error::other)?,
    );

    let mut store = EmbeddingStore::new(store_config()?);
    if let Some(graph) = load_graph()? {
        store = store.with_graph(graph);
    }

    let list = TcpListener::bind(&addr).await?;
    info!("embedding store listening at {addr}");

    let mut server = KvServer::new(StoreHandle::new(store));

    tokio::select! {
        ret = server.serve(list) => ret?,
        _ = signal::ctrl_c() => {
            info!("received SIGTERM");
        }
    }

    Ok(())
}
