//! Plugins shared by the unit tests.

use crate::channel::Channel;
use crate::error::BridgeError;
use crate::message::ScriptMessage;
use crate::meta::MetaBuilder;
use crate::plugin::{Exported, Plugin, RawMessageHandler};
use crate::value::{NativeRef, ScriptValue};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn thread_name() -> String {
    thread::current().name().unwrap_or("unnamed").to_owned()
}

/// Methods, a writable property and a read-only one.
pub struct Greeter {
    greeting: Mutex<String>,
}

impl Default for Greeter {
    fn default() -> Self {
        Self {
            greeting: Mutex::new("hello".to_owned()),
        }
    }
}

impl Greeter {
    pub fn greeting(&self) -> String {
        self.greeting.lock().clone()
    }

    pub fn set_greeting(&self, greeting: &str) {
        *self.greeting.lock() = greeting.to_owned();
    }

    #[allow(dead_code)]
    fn secret(&self) -> &'static str {
        "never exported"
    }
}

impl Plugin for Greeter {}

impl Exported for Greeter {
    fn export(meta: &mut MetaBuilder<Self>) {
        meta.method("greet", 1, |this, args| {
            let name = args[0].as_str().unwrap_or("stranger");
            Ok(format!("{}, {}", this.greeting(), name).into())
        })
        .method("fail", 1, |_, args| {
            Err(BridgeError::native(args[0].as_str().unwrap_or("failed")))
        })
        .property_with_setter(
            "greeting",
            |this| this.greeting().into(),
            |this, value| match value.as_str() {
                Some(greeting) => {
                    this.set_greeting(greeting);
                    Ok(())
                }
                None => Err(BridgeError::native("greeting must be a string")),
            },
        )
        .property("version", |_| 1.into());
    }
}

/// Constructible from scripts.
pub struct Counter {
    value: AtomicI64,
}

impl Counter {
    pub fn new(value: i64) -> Self {
        Self {
            value: AtomicI64::new(value),
        }
    }
}

impl Plugin for Counter {}

impl Exported for Counter {
    fn export(meta: &mut MetaBuilder<Self>) {
        meta.initializer(1, |args| Ok(Counter::new(args[0].as_i64().unwrap_or(0))))
            .command("increment", 1, |this, args| {
                let by = args[0].as_i64().unwrap_or(1);
                this.value.fetch_add(by, Ordering::SeqCst);
                Ok(())
            })
            .property("value", |this| this.value.load(Ordering::SeqCst).into());
    }
}

/// Declares `twice` two times.
pub struct Shadowed;

impl Plugin for Shadowed {}

impl Exported for Shadowed {
    fn export(meta: &mut MetaBuilder<Self>) {
        meta.command("twice", 0, |_, _| Ok(()))
            .method("twice", 1, |_, _| Ok(ScriptValue::Null))
            .command("once", 0, |_, _| Ok(()));
    }
}

/// Records every fragment key handed to the rewrite hook.
#[derive(Default)]
pub struct Rewriting {
    keys: Mutex<Vec<String>>,
}

impl Rewriting {
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().clone()
    }
}

impl Plugin for Rewriting {
    fn rewrite_generated_stub(&self, stub: String, key: &str) -> String {
        self.keys.lock().push(key.to_owned());
        if key == ".global" {
            format!("/* rewritten */{}", stub)
        } else {
            stub
        }
    }
}

impl Exported for Rewriting {
    fn export(meta: &mut MetaBuilder<Self>) {
        meta.command("ping", 0, |_, _| Ok(()))
            .property("size", |_| 3.into());
    }
}

/// Records calls and the thread each ran on.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<(Vec<ScriptValue>, String)>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<Vec<ScriptValue>> {
        self.calls.lock().iter().map(|(args, _)| args.clone()).collect()
    }

    pub fn threads(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(_, thread)| thread.clone()).collect()
    }
}

impl Plugin for Recorder {}

impl Exported for Recorder {
    fn export(meta: &mut MetaBuilder<Self>) {
        meta.variadic_command("record", |this, args| {
            this.calls.lock().push((args, thread_name()));
            Ok(())
        });
    }
}

/// Hands out other exposed objects.
pub struct Registry {
    favorite: Arc<Greeter>,
    child: Arc<Greeter>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            favorite: Arc::new(Greeter::default()),
            child: Arc::new(Greeter::default()),
        }
    }
}

impl Plugin for Registry {}

impl Exported for Registry {
    fn export(meta: &mut MetaBuilder<Self>) {
        meta.method("child", 0, |this, _| Ok(NativeRef::new(this.child.clone()).into()))
            .method("make", 0, |_, _| Ok(NativeRef::from_value(Greeter::default()).into()))
            .property("favorite", |this| NativeRef::new(this.favorite.clone()).into());
    }
}

/// Claims raw messages under a fixed channel identifier.
#[derive(Default)]
pub struct Raw {
    received: Mutex<Vec<ScriptMessage>>,
}

impl Raw {
    pub fn received(&self) -> Vec<ScriptMessage> {
        self.received.lock().clone()
    }
}

impl Plugin for Raw {
    fn channel_identifier(&self) -> Option<String> {
        Some("raw-channel".to_owned())
    }

    fn raw_message_handler(&self) -> Option<&dyn RawMessageHandler> {
        Some(self)
    }
}

impl RawMessageHandler for Raw {
    fn did_receive_raw(&self, message: &ScriptMessage) {
        self.received.lock().push(message.clone());
    }
}

impl Exported for Raw {
    fn export(meta: &mut MetaBuilder<Self>) {
        meta.command("ping", 0, |_, _| Ok(()));
    }
}

static JOURNAL: Mutex<Vec<String>> = parking_lot::const_mutex(Vec::new());

/// Constructible; its initializer and `work` write to one journal.
pub struct Journal;

impl Journal {
    pub fn entries() -> Vec<String> {
        JOURNAL.lock().clone()
    }
}

impl Plugin for Journal {}

impl Exported for Journal {
    fn export(meta: &mut MetaBuilder<Self>) {
        meta.initializer(0, |_| {
            JOURNAL.lock().push(format!("init on {}", thread_name()));
            Ok(Journal)
        })
        .command("work", 0, |_, _| {
            thread::sleep(Duration::from_millis(150));
            JOURNAL.lock().push("work done".to_owned());
            Ok(())
        });
    }
}

/// Its `echo` getter reads back through the channel it is bound on.
#[derive(Clone, Default)]
pub struct Mirror {
    channel: Arc<Mutex<Option<Channel>>>,
}

impl Mirror {
    pub fn attach(&self, channel: Channel) {
        *self.channel.lock() = Some(channel);
    }
}

impl Plugin for Mirror {}

impl Exported for Mirror {
    fn export(meta: &mut MetaBuilder<Self>) {
        meta.method("reflect", 0, |this, _| Ok(NativeRef::from_value(this.clone()).into()))
            .property("echo", |this| {
                let channel = this.channel.lock().clone();
                match channel {
                    Some(channel) => channel.serialize(&ScriptValue::from(7)).into(),
                    None => ScriptValue::Null,
                }
            });
    }
}

/// Completes its callback argument with the first argument; `null` fails.
pub struct Echo;

impl Plugin for Echo {}

impl Exported for Echo {
    fn export(meta: &mut MetaBuilder<Self>) {
        meta.command("echo", 2, |_, mut args| {
            let callback = args[1]
                .take_callback()
                .ok_or_else(|| BridgeError::native("callback required"))?;
            let outcome = match args.swap_remove(0) {
                ScriptValue::Null => Err("nothing to echo"),
                value => Ok(value),
            };
            callback.complete(outcome)
        });
    }
}
