//! CLI subcommands over the post/category database and its cache.

use cache_machine::cache::{CacheOrchestrator, CacheStore, KeyRegistry, StoreBackend};
use cache_machine::config::Config;
use cache_machine::db::{CategoryRepository, Database, NewPost, PostChanges, PostRepository};
use clap::Subcommand;
use color_eyre::Result;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Create, update, delete and list posts
  #[command(subcommand)]
  Posts(PostsCommand),
  /// Create, delete and list categories
  #[command(subcommand)]
  Categories(CategoriesCommand),
  /// Read a cached view, regenerating it on a miss
  Withdraw { key: String },
  /// Fill a managed key only if it is missing
  ForceFetch { key: String },
  /// List managed keys and whether they are cached
  Keys,
  /// Fill every missing managed key
  Warm,
  /// Drop every cache entry
  Flush,
}

#[derive(Subcommand, Debug)]
pub enum PostsCommand {
  Create {
    #[arg(long)]
    title: String,
    #[arg(long)]
    content: String,
    /// Category id
    #[arg(long)]
    category: Option<i64>,
  },
  Update {
    id: i64,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    content: Option<String>,
    /// Move the post to this category id
    #[arg(long)]
    category: Option<i64>,
    /// Remove the post from its category
    #[arg(long, conflicts_with = "category")]
    no_category: bool,
  },
  Delete {
    id: i64,
  },
  List,
}

#[derive(Subcommand, Debug)]
pub enum CategoriesCommand {
  Create { name: String },
  Delete { id: i64 },
  List,
}

/// Repositories wired to one cache, as the CLI sees them.
pub struct Workspace {
  cache: CacheOrchestrator<StoreBackend>,
  posts: PostRepository,
  categories: CategoryRepository,
  registries: Vec<KeyRegistry>,
  /// Stand-in for keys no entity type declares
  unmanaged: KeyRegistry,
}

impl Workspace {
  pub fn open(config: &Config) -> Result<Self> {
    let db = Arc::new(match &config.database {
      Some(path) => Database::open(path)?,
      None => Database::open_default()?,
    });
    let store = config.open_store()?;
    info!(backend = store.name(), "opened cache store");

    let cache = CacheOrchestrator::new(store);
    let post_keys = PostRepository::cache_keys(&db);
    let category_keys = CategoryRepository::cache_keys(&db);

    let mut posts = PostRepository::new(Arc::clone(&db));
    let mut categories = CategoryRepository::new(db);
    cache.register(&post_keys, &mut posts);
    cache.register(&category_keys, &mut categories);

    Ok(Self {
      cache,
      posts,
      categories,
      registries: vec![post_keys, category_keys],
      unmanaged: KeyRegistry::builder("unmanaged").build(),
    })
  }

  fn registry_for(&self, key: &str) -> &KeyRegistry {
    self
      .registries
      .iter()
      .find(|registry| registry.contains(key))
      .unwrap_or(&self.unmanaged)
  }

  pub fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Posts(command) => self.run_posts(command),
      Command::Categories(command) => self.run_categories(command),
      Command::Withdraw { key } => print_json(&self.cache.withdraw(self.registry_for(&key), &key)?),
      Command::ForceFetch { key } => {
        print_json(&self.cache.force_fetch(self.registry_for(&key), &key)?)
      }
      Command::Keys => {
        let mut keys = Vec::new();
        for registry in &self.registries {
          for key in registry.keys() {
            keys.push(json!({
              "key": key,
              "entity_type": registry.entity_type(),
              "cached": self.cache.store().get(key)?.is_some(),
            }));
          }
        }
        print_json(&keys)
      }
      Command::Warm => {
        let mut filled = 0;
        for registry in &self.registries {
          filled += self.cache.warm(registry)?;
        }
        print_json(&json!({ "filled": filled }))
      }
      Command::Flush => {
        self.cache.flush()?;
        print_json(&json!({ "flushed": true }))
      }
    }
  }

  fn run_posts(&self, command: PostsCommand) -> Result<()> {
    match command {
      PostsCommand::Create {
        title,
        content,
        category,
      } => {
        let mut post = NewPost::new(title, content);
        post.category_id = category;
        print_json(&self.posts.create(post)?)
      }
      PostsCommand::Update {
        id,
        title,
        content,
        category,
        no_category,
      } => {
        let changes = PostChanges {
          title,
          content,
          category_id: if no_category { Some(None) } else { category.map(Some) },
        };
        print_json(&self.posts.update(id, changes)?)
      }
      PostsCommand::Delete { id } => {
        self.posts.delete(id)?;
        print_json(&json!({ "deleted": id }))
      }
      PostsCommand::List => print_json(&self.posts.all()?),
    }
  }

  fn run_categories(&self, command: CategoriesCommand) -> Result<()> {
    match command {
      CategoriesCommand::Create { name } => print_json(&self.categories.create(&name)?),
      CategoriesCommand::Delete { id } => {
        self.categories.delete(id)?;
        print_json(&json!({ "deleted": id }))
      }
      CategoriesCommand::List => print_json(&self.categories.all()?),
    }
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
