//! Filesystem plugin
//!
//! Exposes a [`ContentStore`] to scripts. Plain members are synchronous
//! round trips whose failures throw in the calling script. The `*Async`
//! members return at once and complete their callback argument node-style,
//! `callback(err, result)`, from the store's worker pool.

use crate::store::{ContentStore, FileContentStore, Metadata};
use crate::Result;
use latch_bridge::{BridgeError, Exported, MetaBuilder, Plugin, ScriptCallback, ScriptValue};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use tracing::warn;

/// Namespace the runtime binds the plugin at.
pub const DEFAULT_NAMESPACE: &str = "io.latch.fs";

pub struct FileSystemPlugin<S: ContentStore = FileContentStore> {
    store: Arc<S>,
}

impl<S: ContentStore> FileSystemPlugin<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

impl<S: ContentStore> Plugin for FileSystemPlugin<S> {
    fn description(&self) -> String {
        "FileSystem".to_owned()
    }
}

impl<S: ContentStore> Exported for FileSystemPlugin<S> {
    fn export(meta: &mut MetaBuilder<Self>) {
        meta.method("exists", 1, |this, args| {
            Ok(this.store.exists(path_arg(&args)?).into())
        })
        .method("stat", 1, |this, args| {
            let metadata = this.store.stat(path_arg(&args)?).map_err(BridgeError::native)?;
            Ok(stat_value(&metadata))
        })
        .method("getContent", 1, |this, args| {
            let bytes = this
                .store
                .read_content(path_arg(&args)?)
                .map_err(BridgeError::native)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned().into())
        })
        .method("getContentBytes", 1, |this, args| {
            let bytes = this
                .store
                .read_content(path_arg(&args)?)
                .map_err(BridgeError::native)?;
            Ok(ScriptValue::Bytes(bytes))
        })
        .method("getDirectory", 1, |this, args| {
            let names = this
                .store
                .read_dir(path_arg(&args)?)
                .map_err(BridgeError::native)?;
            Ok(names.into())
        })
        .command("statAsync", 2, |this, mut args| {
            let path = path_arg(&args)?.to_owned();
            let callback = callback_arg(&mut args)?;
            this.store.clone().stat_async(
                path,
                Box::new(move |result: Result<Metadata>| {
                    finish(callback, result.map(|metadata| stat_value(&metadata)))
                }),
            );
            Ok(())
        })
        .command("getDirectoryAsync", 2, |this, mut args| {
            let path = path_arg(&args)?.to_owned();
            let callback = callback_arg(&mut args)?;
            this.store.clone().read_dir_async(
                path,
                Box::new(move |result: Result<Vec<String>>| {
                    finish(callback, result.map(ScriptValue::from))
                }),
            );
            Ok(())
        })
        .command("getContentAsync", 2, |this, mut args| {
            let path = item_path(&args)?.to_owned();
            let callback = callback_arg(&mut args)?;
            this.store.clone().read_content_async(
                path,
                Box::new(move |result: Result<Vec<u8>>| {
                    let text = result
                        .map(|bytes| ScriptValue::from(String::from_utf8_lossy(&bytes).into_owned()));
                    finish(callback, text)
                }),
            );
            Ok(())
        })
        .method("writeContent", 2, |this, args| {
            let path = path_arg(&args)?;
            let content = match &args[1] {
                ScriptValue::String(text) => text.as_bytes().to_vec(),
                ScriptValue::Bytes(bytes) => bytes.clone(),
                ScriptValue::Array(items) => items
                    .iter()
                    .map(|item| item.as_i64().and_then(|b| u8::try_from(b).ok()))
                    .collect::<Option<Vec<u8>>>()
                    .ok_or_else(|| BridgeError::native("content must be a string or bytes"))?,
                other => {
                    return Err(BridgeError::native(format!(
                        "content must be a string or bytes, got {}",
                        other.kind()
                    )))
                }
            };
            this.store
                .write_content(path, &content)
                .map_err(BridgeError::native)?;
            Ok(true.into())
        });
    }
}

fn path_arg(args: &[ScriptValue]) -> Result<&str, BridgeError> {
    args.first()
        .and_then(ScriptValue::as_str)
        .ok_or_else(|| BridgeError::native("path must be a string"))
}

/// A path, or a stat result carrying one.
fn item_path(args: &[ScriptValue]) -> Result<&str, BridgeError> {
    match args.first() {
        Some(ScriptValue::Object(item)) => item.get("path").and_then(ScriptValue::as_str),
        Some(other) => other.as_str(),
        None => None,
    }
    .ok_or_else(|| BridgeError::native("path must be a string or a stat result"))
}

fn callback_arg(args: &mut [ScriptValue]) -> Result<ScriptCallback, BridgeError> {
    args.get_mut(1)
        .and_then(ScriptValue::take_callback)
        .ok_or_else(|| BridgeError::native("callback must be a function"))
}

fn finish<E: Display>(callback: ScriptCallback, outcome: Result<ScriptValue, E>) {
    let id = callback.id();
    if let Err(err) = callback.complete(outcome) {
        warn!(callback = id, "completion not delivered: {}", err);
    }
}

/// Script-facing shape of [`Metadata`].
fn stat_value(metadata: &Metadata) -> ScriptValue {
    let mut stat = BTreeMap::new();
    stat.insert("path".to_owned(), metadata.path.clone().into());
    stat.insert("birthtime".to_owned(), metadata.created_at.into());
    stat.insert("mtime".to_owned(), metadata.modified_at.into());
    stat.insert("size".to_owned(), metadata.size.into());
    stat.insert("filetype".to_owned(), metadata.kind.as_str().into());
    stat.into()
}
