//! Sample host for `uow_core`.
//!
//! # Responsibility
//! - Wire configuration, logging and a store into a unit of work.
//! - Exercise the repository surface against a small blog model.

use log::info;
use serde::{Deserialize, Serialize};
use std::process::ExitCode;
use std::sync::Arc;
use uow_core::{
    init_from_config, CancellationToken, CoreConfig, Entity, EntityKey, EntityType, MemoryStore,
    Model, OrderBy, PageRequest, Predicate, QuerySpec, Relation, RepoResult, Repository,
    RepositoryHooks, RepositoryResolver, SqliteStore, Store, UnitOfWork,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Blog {
    id: i64,
    url: String,
    #[serde(skip)]
    posts: Vec<Post>,
}

impl Entity for Blog {
    const NAME: &'static str = "blogs";

    fn key(&self) -> EntityKey {
        EntityKey::from(self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Post {
    id: i64,
    blog_id: i64,
    title: String,
    #[serde(default)]
    published: bool,
    #[serde(skip)]
    comments: Vec<Comment>,
}

impl Entity for Post {
    const NAME: &'static str = "posts";

    fn key(&self) -> EntityKey {
        EntityKey::from(self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Comment {
    id: i64,
    post_id: i64,
    body: String,
}

impl Entity for Comment {
    const NAME: &'static str = "comments";

    fn key(&self) -> EntityKey {
        EntityKey::from(self.id)
    }
}

/// Post repository that only sees published posts.
struct PublishedPosts;

impl RepositoryHooks<Post> for PublishedPosts {
    fn name(&self) -> &'static str {
        "published_posts"
    }

    fn scope(&self) -> Option<Predicate<Post>> {
        Some(Predicate::new(|post: &Post| post.published))
    }

    fn before_insert(&self, post: &Post) -> Result<(), String> {
        if post.title.trim().is_empty() {
            return Err("post title is required".to_string());
        }
        Ok(())
    }
}

fn model() -> Result<Model, uow_core::ConfigError> {
    Model::builder()
        .register(EntityType::<Blog>::new().primary_key(["id"]).stub(|key| {
            key.as_i64().map(|id| Blog {
                id,
                url: String::new(),
                posts: Vec::new(),
            })
        }))
        .register(EntityType::<Post>::new().primary_key(["id"]))
        .register(EntityType::<Comment>::new().primary_key(["id"]))
        .build()
}

fn resolver<S: Store>() -> RepoResult<Arc<RepositoryResolver<S>>> {
    let mut resolver = RepositoryResolver::new();
    resolver.register::<Post, _>(|store| Repository::with_hooks(store, PublishedPosts))?;
    Ok(Arc::new(resolver))
}

fn posts_with_comments() -> Relation<Blog, Post> {
    Relation::many(
        "posts",
        |blog: &Blog, post: &Post| post.blog_id == blog.id,
        |blog: &mut Blog, posts: Vec<Post>| blog.posts = posts,
    )
    .then(Relation::many(
        "comments",
        |post: &Post, comment: &Comment| comment.post_id == post.id,
        |post: &mut Post, comments: Vec<Comment>| post.comments = comments,
    ))
}

fn seed<S: Store>(uow: &mut UnitOfWork<S>) -> RepoResult<()> {
    let blogs = uow.repository::<Blog>()?;
    if blogs.exists(None)? {
        return Ok(());
    }
    blogs.insert_many(
        [
            Blog {
                id: 1,
                url: "https://rust.example/blog".to_string(),
                posts: Vec::new(),
            },
            Blog {
                id: 2,
                url: "https://sql.example/blog".to_string(),
                posts: Vec::new(),
            },
        ]
        .iter(),
    )?;

    let posts = (1..=6).map(|id| Post {
        id,
        blog_id: if id % 2 == 0 { 2 } else { 1 },
        title: format!("Post {id}"),
        published: id != 5,
        comments: Vec::new(),
    });
    uow.repository::<Post>()?
        .insert_many(posts.collect::<Vec<_>>().iter())?;

    uow.repository::<Comment>()?.insert_many(
        [
            Comment {
                id: 1,
                post_id: 1,
                body: "first".to_string(),
            },
            Comment {
                id: 2,
                post_id: 1,
                body: "second".to_string(),
            },
            Comment {
                id: 3,
                post_id: 4,
                body: "nice".to_string(),
            },
        ]
        .iter(),
    )?;

    let written = uow.commit(true)?;
    info!("event=cli_seed module=cli status=ok rows={}", written);
    Ok(())
}

async fn run<S: Store>(mut uow: UnitOfWork<S>, config: &CoreConfig) -> RepoResult<()> {
    seed(&mut uow)?;
    let cancel = CancellationToken::new();

    let blogs = uow.repository::<Blog>()?;
    let spec = QuerySpec::new()
        .include(posts_with_comments())
        .order_by(OrderBy::asc(|blog: &Blog| blog.id));
    for blog in blogs.list_async(&spec, &cancel).await? {
        let comments: usize = blog.posts.iter().map(|post| post.comments.len()).sum();
        println!(
            "blog id={} url={} posts={} comments={}",
            blog.id,
            blog.url,
            blog.posts.len(),
            comments
        );
    }

    let posts = uow.get_repository::<Post>(true)?;
    let request = PageRequest::from_config(config, 0)?;
    let titles = posts.page_as(
        &QuerySpec::new().order_by(OrderBy::desc(|post: &Post| post.id)),
        request,
        |post| post.title,
    )?;
    println!("{}", serde_json::to_string(&titles)?);

    let search = QuerySpec::new().filter(|post: &Post| post.title.ends_with('3'));
    let found = posts.first_async(&search, &cancel).await?;
    println!(
        "search match={}",
        found.map_or_else(|| "none".to_string(), |post| post.title)
    );
    println!(
        "published={} all={}",
        posts.count(None)?,
        uow.repository::<Post>()?.count(None)?
    );

    let mut archive = UnitOfWork::new(MemoryStore::new(model()?));
    if let Some(retired) = blogs.find_async(2_i64, &cancel).await? {
        archive.repository::<Blog>()?.insert(&retired)?;
        blogs.delete_by_key(retired.id)?;
    }
    let moved = uow.commit_atomic(true, &mut [&mut archive])?;
    println!(
        "archived rows={moved} archive_blogs={}",
        archive.repository::<Blog>()?.count(None)?
    );
    println!(
        "blog 1 present={}",
        blogs.find_async(1_i64, &cancel).await?.is_some()
    );

    archive.dispose();
    uow.dispose();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let config = match CoreConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(2);
        }
    };
    if let Err(err) = init_from_config(&config) {
        eprintln!("logging disabled: {err}");
    }
    println!("uow_core version={}", uow_core::core_version());

    let result = match model() {
        Ok(model) => match &config.database_path {
            Some(path) => match (SqliteStore::open(path, model), resolver()) {
                (Ok(store), Ok(resolver)) => {
                    run(UnitOfWork::with_resolver(store, resolver), &config).await
                }
                (Err(err), _) => Err(err.into()),
                (_, Err(err)) => Err(err),
            },
            None => match resolver() {
                Ok(resolver) => {
                    run(
                        UnitOfWork::with_resolver(MemoryStore::new(model), resolver),
                        &config,
                    )
                    .await
                }
                Err(err) => Err(err),
            },
        },
        Err(err) => Err(err.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
