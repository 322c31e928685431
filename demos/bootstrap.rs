//! Example wiring a small application through the instantiation service
//!
//! Run with pretty logging:
//! ```bash
//! cargo run --example bootstrap --features logging-pretty
//! ```
//!
//! Run with JSON logging:
//! ```bash
//! cargo run --example bootstrap --features logging-json
//! ```

use instantiation_service::prelude::*;
use instantiation_service::{Emitter, Event, InstantiationOptions};
use std::sync::Mutex;

// Contracts

trait ConfigurationService: Send + Sync {
    fn value(&self, key: &str) -> Option<String>;
}

trait SearchService: Send + Sync {
    fn search(&self, query: &str) -> Vec<String>;
    fn on_did_index(&self) -> Event<usize>;
}

const CONFIGURATION: ServiceIdentifier<dyn ConfigurationService> =
    ServiceIdentifier::new("configurationService");
const FILES: ServiceIdentifier<FileService> = ServiceIdentifier::new("fileService");
const SEARCH: ServiceIdentifier<dyn SearchService> = ServiceIdentifier::new("searchService");
const WORKSPACE: ServiceIdentifier<String> = ServiceIdentifier::new("workspace");

// Implementations

struct StaticConfiguration;

impl ConfigurationService for StaticConfiguration {
    fn value(&self, key: &str) -> Option<String> {
        (key == "files.root").then(|| "/srv/project".to_string())
    }
}

struct FileService {
    root: String,
    files: Mutex<Vec<String>>,
}

impl Construct for FileService {
    fn dependencies() -> Vec<ServiceDependency> {
        vec![CONFIGURATION.at(0)]
    }

    fn construct(args: &Arguments) -> Result<Self> {
        let config: Arc<dyn ConfigurationService> = args.service(0)?;
        println!("  [App] FileService being created...");
        Ok(FileService {
            root: config.value("files.root").unwrap_or_default(),
            files: Mutex::new(vec!["main.rs".into(), "lib.rs".into(), "README.md".into()]),
        })
    }

    fn disposable(instance: &Arc<Self>) -> Option<Arc<dyn Disposable>> {
        Some(instance.clone())
    }
}

impl Disposable for FileService {
    fn dispose(&self) {
        println!("  [App] FileService disposed ({})", self.root);
    }
}

struct IndexedSearch {
    files: Arc<FileService>,
    indexed: Emitter<usize>,
}

impl SearchService for IndexedSearch {
    fn search(&self, query: &str) -> Vec<String> {
        let files = self.files.files.lock().map(|f| f.clone()).unwrap_or_default();
        self.indexed.fire(&files.len());
        files.into_iter().filter(|f| f.contains(query)).collect()
    }

    fn on_did_index(&self) -> Event<usize> {
        self.indexed.event()
    }
}

/// Stands in for the search service until it is first used
struct SearchProxy(Delayed<dyn SearchService>);

impl SearchService for SearchProxy {
    fn search(&self, query: &str) -> Vec<String> {
        self.0.value().map(|s| s.search(query)).unwrap_or_default()
    }

    fn on_did_index(&self) -> Event<usize> {
        self.0.on_event(|search| search.on_did_index())
    }
}

fn search_descriptor() -> ServiceDescriptor<dyn SearchService> {
    let ctor = Constructor::from_fn("IndexedSearch", |args: &Arguments| {
        println!("  [App] IndexedSearch being created...");
        Ok(Arc::new(IndexedSearch {
            files: args.service(0)?,
            indexed: Emitter::new(),
        }) as Arc<dyn SearchService>)
    })
    .with_dependencies([FILES.at(0)]);

    ServiceDescriptor::new(ctor)
        .delayed(|slot| Arc::new(SearchProxy(slot)) as Arc<dyn SearchService>)
}

struct Editor {
    workspace: Arc<String>,
    search: Arc<dyn SearchService>,
}

impl Construct for Editor {
    fn dependencies() -> Vec<ServiceDependency> {
        vec![WORKSPACE.at(0), SEARCH.at(1)]
    }

    fn construct(args: &Arguments) -> Result<Self> {
        Ok(Editor {
            workspace: args.service(0)?,
            search: args.service(1)?,
        })
    }
}

fn main() -> Result<()> {
    // JSON if logging-json is enabled, pretty if logging-pretty is
    instantiation_service::logging::init();

    println!("=== Instantiation Service Demo ===\n");

    let services = ServiceCollection::new();
    services.set_instance(
        &CONFIGURATION,
        Arc::new(StaticConfiguration) as Arc<dyn ConfigurationService>,
    );
    services.set_descriptor(&FILES, FileService::descriptor());
    services.set_descriptor(&SEARCH, search_descriptor());

    let root = InstantiationService::with_options(services, InstantiationOptions::new().strict(true));

    println!("1. Resolving the search service (a proxy, nothing built yet)");
    let search = root.invoke_function(|accessor| accessor.get(&SEARCH))?;
    let _listener = search.on_did_index().subscribe(|count| {
        println!("  [App] indexed {count} files");
    });

    println!("\n2. Opening a window with its own workspace");
    let window_services = ServiceCollection::new();
    window_services.set_instance(&WORKSPACE, Arc::new("/srv/project".to_string()));
    let window = root.create_child(window_services, None)?;

    let editor = window.create_instance(&Editor::constructor(), args![])?;
    println!("  [App] editor opened on {}", editor.workspace);

    println!("\n3. First search builds the real service");
    let hits = editor.search.search(".rs");
    println!("  [App] hits: {hits:?}");

    println!("\n4. Shutting down");
    root.dispose();
    println!("  [App] window disposed: {}", window.is_disposed());

    println!("\n=== Demo Complete ===");
    Ok(())
}
