use crate::config::StoreConfig;
use crate::errors::Result;
use crate::storage::DocumentStore;
use once_cell::sync::Lazy;
use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, RwLock},
};

pub type BoxedDocumentStoreFuture =
    Pin<Box<dyn Future<Output = Result<Arc<dyn DocumentStore>>> + Send>>;
pub type DocumentStoreConstructor =
    Arc<dyn Fn(StoreConfig) -> BoxedDocumentStoreFuture + Send + Sync>;

static DOCUMENT_STORE_REGISTRY: Lazy<RwLock<HashMap<String, DocumentStoreConstructor>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

pub fn register_document_store_plugin<S: Into<String>>(
    name: S,
    constructor: DocumentStoreConstructor,
) {
    let name = name.into();
    let mut registry = DOCUMENT_STORE_REGISTRY
        .write()
        .expect("Store registry lock poisoned");
    registry.insert(name, constructor);
}

pub fn get_document_store_plugin(name: &str) -> Option<DocumentStoreConstructor> {
    DOCUMENT_STORE_REGISTRY
        .read()
        .expect("Store registry lock poisoned")
        .get(name)
        .cloned()
}

/// 注册内置的存储后端（memory / redis），重复调用是安全的
pub fn register_builtin_plugins() {
    register_document_store_plugin(
        "memory",
        Arc::new(|_config: StoreConfig| {
            Box::pin(async move {
                let store: Arc<dyn DocumentStore> = Arc::new(super::MemoryStorage::new());
                Ok(store)
            }) as BoxedDocumentStoreFuture
        }),
    );
    register_document_store_plugin(
        "redis",
        Arc::new(|config: StoreConfig| {
            Box::pin(async move {
                let store: Arc<dyn DocumentStore> =
                    Arc::new(super::RedisDocumentStore::new(&config.redis)?);
                Ok(store)
            }) as BoxedDocumentStoreFuture
        }),
    );
}

pub fn debug_document_store_registry() {
    let registry = DOCUMENT_STORE_REGISTRY
        .read()
        .expect("Store registry lock poisoned");
    if registry.is_empty() {
        tracing::debug!("No document store plugins registered.");
    } else {
        tracing::debug!("Registered document store plugins:");
        for key in registry.keys() {
            tracing::debug!(" - {}", key);
        }
    }
}
