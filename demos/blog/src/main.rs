//! blog-demo
//!
//! Wires the transition engine to a tiny in-memory blog: nested routes,
//! async model resolution, query params, and an aborted transition.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use junction::prelude::*;
use junction::testing::{RouteLevel, TestRecognizer};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
struct Post {
    id: u32,
    title: String,
}

/// Pretend database.
#[derive(Clone)]
struct PostStore {
    posts: Arc<HashMap<u32, Post>>,
}

impl PostStore {
    fn seeded() -> Self {
        let mut posts = HashMap::new();
        posts.insert(
            1,
            Post {
                id: 1,
                title: "Typed state trees".to_string(),
            },
        );
        posts.insert(
            2,
            Post {
                id: 2,
                title: "Cancellation is a flag, not a kill".to_string(),
            },
        );
        Self {
            posts: Arc::new(posts),
        }
    }

    async fn fetch(&self, id: u32) -> Option<Post> {
        // Stand-in for a real async lookup.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        self.posts.get(&id).cloned()
    }
}

struct IndexHandler;

impl Handler for IndexHandler {}

struct PostsHandler;

impl Handler for PostsHandler {
    fn setup(&self, _context: Option<&SharedModel>, query_params: &QueryParams) -> Result<()> {
        println!("  posts pane ready (sort={})", query_params.get("sort").map_or("default", String::as_str));
        Ok(())
    }

    fn exit(&self) {
        println!("  posts pane torn down");
    }
}

struct ShowPostHandler {
    store: PostStore,
}

#[async_trait]
impl Handler for ShowPostHandler {
    async fn model(
        &self,
        params: &Params,
        _transition: &Transition,
        _query_params: &QueryParams,
    ) -> HookResult {
        let id: u32 = params
            .get("id")
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| anyhow::anyhow!("bad post id"))?;
        let post = self
            .store
            .fetch(id)
            .await
            .ok_or_else(|| anyhow::anyhow!("no post {id}"))?;
        Ok(HookValue::Model(SharedModel::identified(post, id)))
    }

    fn setup(&self, context: Option<&SharedModel>, _query_params: &QueryParams) -> Result<()> {
        if let Some(post) = context.and_then(|c| c.downcast_ref::<Post>()) {
            println!("  showing post #{}: {}", post.id, post.title);
        }
        Ok(())
    }

    fn exit(&self) {
        println!("  post view torn down");
    }
}

struct BlogHost {
    store: PostStore,
}

impl RouterHost for BlogHost {
    fn get_handler(&self, name: &str) -> Arc<dyn Handler> {
        match name {
            "index" => Arc::new(IndexHandler),
            "posts" => Arc::new(PostsHandler),
            "showPost" => Arc::new(ShowPostHandler {
                store: self.store.clone(),
            }),
            other => panic!("unknown route handler `{other}`"),
        }
    }

    fn update_url(&self, url: &str) {
        println!("  url -> {url}");
    }

    fn did_transition(&self, handler_infos: &[junction::HandlerInfo]) {
        let chain: Vec<&str> = handler_infos.iter().map(|i| i.name.as_str()).collect();
        println!("  committed chain: {}", chain.join(" / "));
    }
}

fn build_recognizer() -> TestRecognizer {
    let mut recognizer = TestRecognizer::new();
    recognizer.add_chain(vec![
        RouteLevel::new("index", ""),
        RouteLevel::new("posts", "posts").with_query_params(&["sort"]),
        RouteLevel::new("showPost", ":id"),
    ]);
    recognizer
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let store = PostStore::seeded();
    let router = Router::new(
        Arc::new(build_recognizer()),
        Arc::new(BlogHost {
            store: store.clone(),
        }),
    );

    println!("handle_url /posts/1");
    let transition = router.handle_url("/posts/1").await?;
    println!(
        "  resolved snapshot: {}",
        serde_json::to_string(&transition.snapshot())?
    );

    println!("transition_to showPost(2) with sort=title");
    router
        .transition_to(TransitionRequest::to("showPost").context(2).query("sort", "title"))
        .await?;

    println!("aborting a transition mid-flight");
    let doomed = router.transition_to(TransitionRequest::to("showPost").context(1));
    doomed.abort();
    match doomed.outcome().await {
        Err(err) if err.is_aborted() => println!("  aborted as requested"),
        other => println!("  unexpected outcome: {other:?}"),
    }

    // Demonstrate URL generation without transitioning.
    let url = router.generate(
        "showPost",
        &[RouteContext::from(2)],
        &QueryUpdate::new(),
    )?;
    println!("generate(showPost, 2) -> {url}");

    router.reset();
    Ok(())
}
