// channel.rs - Binding of one plugin object to a script namespace
//
// A Channel owns the instance table (id -> BindingObject), the identity side
// table (native object -> id) and the execution affinity its native calls run
// on. The context adapter delivers script messages to it by channel
// identifier; the Channel holds the context weakly so it never keeps the
// engine alive.
//
// Instance ids: 0 is the principal, positive ids are chosen by scripts
// through the create opcode, negative ids are allocated here when a native
// object first crosses the boundary as a value.

use crate::affinity::ExecutionAffinity;
use crate::binding::BindingObject;
use crate::callback::{self, CallbackSink};
use crate::context::{MessageHandler, ScriptContext, ScriptSource};
use crate::error::BridgeError;
use crate::message::{Message, Opcode, ScriptMessage};
use crate::meta::{MemberKind, MetaObject};
use crate::serialize::{self, EngineLiteral, ReferenceResolver, Serializer};
use crate::settings::{BridgeSettings, DEFAULT_SOURCE_URL_PREFIX};
use crate::stub::{Stub, StubTarget, SCRIPT_GLOBAL};
use crate::value::{NativeRef, ScriptValue};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace, warn};

/// Process-wide channel sequence. Identifiers are never reused.
static CHANNEL_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn next_sequence() -> u64 {
    CHANNEL_SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1
}

/// Per-bind configuration.
#[derive(Clone, Debug)]
pub struct ChannelOptions {
    /// `None` selects the shared default queue.
    pub affinity: Option<ExecutionAffinity>,
    pub source_url_prefix: String,
    /// Log every inbound message at debug level.
    pub trace_messages: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            affinity: None,
            source_url_prefix: DEFAULT_SOURCE_URL_PREFIX.to_owned(),
            trace_messages: false,
        }
    }
}

impl ChannelOptions {
    pub fn from_settings(settings: &BridgeSettings) -> Self {
        Self {
            affinity: None,
            source_url_prefix: settings.source_url_prefix.clone(),
            trace_messages: settings.trace_messages,
        }
    }

    pub fn with_affinity(mut self, affinity: ExecutionAffinity) -> Self {
        self.affinity = Some(affinity);
        self
    }
}

#[derive(Default)]
struct ChannelState {
    identifier: Option<String>,
    namespace: String,
    instances: HashMap<i64, Arc<BindingObject>>,
    /// Native object identity -> instance id.
    references: HashMap<usize, i64>,
    next_reference: i64,
    /// References allocated since their stubs were last generated.
    pending_references: VecDeque<PendingReference>,
}

/// A negative-id binding whose proxy the script side does not have yet.
struct PendingReference {
    id: i64,
    owner: String,
    binding: Arc<BindingObject>,
}

struct ChannelInner {
    this: Weak<ChannelInner>,
    context: Weak<dyn ScriptContext>,
    affinity: ExecutionAffinity,
    source_url_prefix: String,
    trace_messages: bool,
    state: Mutex<ChannelState>,
}

/// The bridge for exactly one plugin binding.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

/// Returned by a successful bind.
#[derive(Clone)]
pub struct ChannelHandle {
    channel: Channel,
    identifier: String,
    namespace: String,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Channel")
            .field("identifier", &state.identifier)
            .field("namespace", &state.namespace)
            .field("affinity", &self.inner.affinity.label())
            .finish()
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("identifier", &self.identifier)
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl ChannelHandle {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn unbind(&self) {
        self.channel.unbind()
    }
}

/// Create a channel on `context` and bind `object` at `namespace`.
pub fn load_plugin<C: ScriptContext + 'static>(
    context: &Arc<C>,
    object: NativeRef,
    namespace: &str,
    options: ChannelOptions,
) -> Result<ChannelHandle, BridgeError> {
    Channel::new(context, options)?.bind(object, namespace)
}

impl Channel {
    pub fn new<C: ScriptContext + 'static>(
        context: &Arc<C>,
        options: ChannelOptions,
    ) -> Result<Self, BridgeError> {
        let affinity = match options.affinity {
            Some(affinity) => affinity,
            None => ExecutionAffinity::shared_queue()?,
        };
        let context: Arc<dyn ScriptContext> = context.clone();
        Ok(Self {
            inner: Arc::new_cyclic(|this| ChannelInner {
                this: this.clone(),
                context: Arc::downgrade(&context),
                affinity,
                source_url_prefix: options.source_url_prefix,
                trace_messages: options.trace_messages,
                state: Mutex::new(ChannelState::default()),
            }),
        })
    }

    /// Bind `object` as the principal instance and inject its stub.
    pub fn bind(&self, object: NativeRef, namespace: &str) -> Result<ChannelHandle, BridgeError> {
        if namespace.is_empty() {
            return Err(BridgeError::EmptyNamespace);
        }
        let context = self.inner.context()?;
        let principal = Arc::new(BindingObject::new(namespace, object));
        let values = principal.property_values();

        let (identifier, stub) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if let Some(identifier) = &state.identifier {
                return Err(BridgeError::AlreadyBound {
                    identifier: identifier.clone(),
                });
            }

            let identifier = principal
                .object()
                .plugin()
                .channel_identifier()
                .unwrap_or_else(|| next_sequence().to_string());
            state.identifier = Some(identifier.clone());
            state.namespace = namespace.to_owned();
            state.next_reference = -1;
            state.references.insert(principal.object().identity(), 0);
            state.instances.insert(0, principal.clone());

            let hook = |value: &ScriptValue| context.engine_literal(value);
            let mut references = References {
                state,
                source_url_prefix: &self.inner.source_url_prefix,
                engine: &hook,
            };
            let stub = references.stub_for(&principal, StubTarget::Plugin { namespace }, values);
            (identifier, stub)
        };

        context.register_message_handler(&identifier, self.inner.clone());

        if let Err(err) = context.inject_source(&stub) {
            error!(channel = %identifier, namespace, "stub injection failed: {}", err);
            self.unbind();
            return Err(match err {
                BridgeError::Evaluation(_) => err,
                other => BridgeError::Evaluation(other.to_string()),
            });
        }

        let hook = |value: &ScriptValue| context.engine_literal(value);
        for source in self.inner.reference_stubs(&hook) {
            if let Err(err) = context.inject_source(&source) {
                warn!(channel = %identifier, file = %source.filename, "reference stub failed: {}", err);
            }
        }

        info!(
            channel = %identifier,
            namespace,
            file = %stub.filename,
            "plugin bound"
        );

        Ok(ChannelHandle {
            channel: self.clone(),
            identifier,
            namespace: namespace.to_owned(),
        })
    }

    /// Tear the binding down. Unbinding twice is a no-op.
    pub fn unbind(&self) {
        self.inner.unbind()
    }

    pub fn identifier(&self) -> Option<String> {
        self.inner.state.lock().identifier.clone()
    }

    pub fn namespace(&self) -> Option<String> {
        let state = self.inner.state.lock();
        state.identifier.as_ref().map(|_| state.namespace.clone())
    }

    pub fn is_bound(&self) -> bool {
        self.inner.state.lock().identifier.is_some()
    }

    /// Reflection of the principal's type.
    pub fn meta(&self) -> Option<Arc<MetaObject>> {
        self.inner.instance(0).map(|principal| principal.meta().clone())
    }

    pub fn instance(&self, id: i64) -> Option<Arc<BindingObject>> {
        self.inner.instance(id)
    }

    /// Live instance ids, ascending.
    pub fn instance_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.inner.state.lock().instances.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn affinity(&self) -> &ExecutionAffinity {
        &self.inner.affinity
    }

    /// Script expression for `value`. Objects crossing for the first time
    /// get a binding, and the expression installs their proxies before
    /// yielding the value.
    pub fn serialize(&self, value: &ScriptValue) -> String {
        self.inner.expression(value)
    }

    pub fn dispatch(&self, message: ScriptMessage) {
        self.inner.did_receive(message)
    }

    pub fn dispatch_sync(&self, message: ScriptMessage) -> String {
        self.inner.did_receive_sync(message)
    }

    /// Wait until native calls submitted so far have run.
    pub fn flush(&self) -> Result<(), BridgeError> {
        self.inner.affinity.flush()
    }
}

impl ChannelInner {
    fn context(&self) -> Result<Arc<dyn ScriptContext>, BridgeError> {
        self.context.upgrade().ok_or(BridgeError::ContextReleased)
    }

    fn instance(&self, id: i64) -> Option<Arc<BindingObject>> {
        self.state.lock().instances.get(&id).cloned()
    }

    fn unbind(&self) {
        let (identifier, namespace) = {
            let mut state = self.state.lock();
            let Some(identifier) = state.identifier.take() else {
                return;
            };
            state.instances.clear();
            state.references.clear();
            state.pending_references.clear();
            (identifier, std::mem::take(&mut state.namespace))
        };

        if let Some(context) = self.context.upgrade() {
            context.deregister_message_handler(&identifier);
        }
        info!(channel = %identifier, namespace = %namespace, "plugin unbound");
    }

    fn dispatch(&self, raw: ScriptMessage, sync: bool) -> Result<Option<ScriptValue>, BridgeError> {
        if self.trace_messages {
            debug!(channel = %raw.name, body = ?raw.body, sync, "message received");
        }

        let message = match Message::decode(&raw) {
            Ok(message) => message,
            Err(err) => {
                if raw.body.is_some() && self.forward_raw(&raw)? {
                    trace!(channel = %raw.name, "{}; forwarded as raw message", err);
                    return Ok(None);
                }
                return Err(err);
            }
        };

        let member = match message.opcode() {
            Opcode::Create => return self.create_instance(&message).map(|()| None),
            Opcode::Dispose => None,
            Opcode::Member(name) => Some(name),
        };

        let Some(binding) = self.instance(message.target) else {
            return if self.forward_raw(&raw)? {
                Ok(None)
            } else {
                Err(BridgeError::UnknownInstance(message.target))
            };
        };

        match member {
            Some(name) => self.call_member(binding, name, &message, sync),
            None => {
                self.dispose(message.target);
                Ok(None)
            }
        }
    }

    fn call_member(
        &self,
        binding: Arc<BindingObject>,
        name: &str,
        message: &Message,
        sync: bool,
    ) -> Result<Option<ScriptValue>, BridgeError> {
        let kind = binding.meta().lookup(name).map(|member| member.kind());
        let name = name.to_owned();

        match kind {
            Some(MemberKind::Property) => {
                let value = serialize::from_operand(message.operand.as_ref());
                let channel = message.channel.clone();
                self.affinity.submit(move || {
                    if let Err(err) = binding.set_property(&name, value) {
                        warn!(channel = %channel, property = %name, "property update dropped: {}", err);
                    }
                })?;
                Ok(None)
            }
            Some(MemberKind::Method) => {
                let sink: Weak<dyn CallbackSink> = self.this.clone();
                let args = serialize::deserialize(message.operand.as_ref(), None);
                let args = callback::attach(args, &sink);
                if sync {
                    let value = self
                        .affinity
                        .run_sync(move || binding.invoke(&name, args))??;
                    return Ok(Some(value));
                }
                let channel = message.channel.clone();
                let target = message.target;
                self.affinity.submit(move || {
                    if let Err(err) = binding.invoke(&name, args) {
                        error!(channel = %channel, target, method = %name, "native call failed: {}", err);
                    }
                })?;
                Ok(None)
            }
            Some(MemberKind::Initializer) | None => Err(BridgeError::UnknownMember { name }),
        }
    }

    fn create_instance(&self, message: &Message) -> Result<(), BridgeError> {
        let target = message.target;
        if target <= 0 {
            return Err(BridgeError::MalformedMessage(format!(
                "cannot create an instance at id {}",
                target
            )));
        }

        let (meta, namespace) = {
            let state = self.state.lock();
            let principal = state
                .instances
                .get(&0)
                .ok_or(BridgeError::UnknownInstance(0))?;
            (
                principal.meta().clone(),
                format!("{}[{}]", state.namespace, target),
            )
        };

        // The initializer is native code: it runs on the affinity, behind
        // calls already queued there.
        let args = serialize::deserialize(message.operand.as_ref(), None);
        let binding = {
            let namespace = namespace.clone();
            self.affinity
                .run_sync(move || BindingObject::construct(namespace, &meta, args))??
        };
        let binding = Arc::new(binding);

        let mut state = self.state.lock();
        if state.identifier.is_none() {
            return Err(BridgeError::UnknownInstance(0));
        }
        state.references.insert(binding.object().identity(), target);
        if let Some(previous) = state.instances.insert(target, binding) {
            // Reused id: the previous instance is orphaned, not disposed.
            state.references.remove(&previous.object().identity());
            warn!(channel = %message.channel, target, "instance id reused; previous instance replaced");
        }
        info!(channel = %message.channel, target, namespace = %namespace, "instance bound");
        Ok(())
    }

    fn dispose(&self, target: i64) {
        if target == 0 {
            self.unbind();
            return;
        }
        let mut state = self.state.lock();
        match state.instances.remove(&target) {
            Some(instance) => {
                state.references.remove(&instance.object().identity());
                info!(target, namespace = %instance.namespace(), "instance unbound");
            }
            None => warn!(target, "invalid instance id"),
        }
    }

    /// Hand a message to the principal's raw handler, if it has one.
    fn forward_raw(&self, raw: &ScriptMessage) -> Result<bool, BridgeError> {
        let Some(principal) = self.instance(0) else {
            return Ok(false);
        };
        if principal.object().plugin().raw_message_handler().is_none() {
            return Ok(false);
        }
        let raw = raw.clone();
        self.affinity.submit(move || {
            if let Some(handler) = principal.object().plugin().raw_message_handler() {
                handler.did_receive_raw(&raw);
            }
        })?;
        Ok(true)
    }

    fn expression(&self, value: &ScriptValue) -> String {
        let context = self.context.upgrade();
        let hook = |value: &ScriptValue| context.as_ref().and_then(|c| c.engine_literal(value));

        let literal = {
            let mut guard = self.state.lock();
            let mut references = References {
                state: &mut *guard,
                source_url_prefix: &self.source_url_prefix,
                engine: &hook,
            };
            Serializer::new(&mut references)
                .with_engine(&hook)
                .serialize(value)
        };

        let stubs = self.reference_stubs(&hook);
        if stubs.is_empty() {
            return literal;
        }
        let mut body = String::new();
        for stub in stubs {
            body.push_str(&stub.source);
            body.push('\n');
        }
        format!("(function() {{\n{}return {};\n}})()", body, literal)
    }

    /// Stubs for every reference allocated since the last drain.
    ///
    /// Property getters run with the state unlocked. Serializing their
    /// values may allocate further references; those are drained in the
    /// same pass.
    fn reference_stubs(&self, engine: EngineLiteral<'_>) -> Vec<ScriptSource> {
        let mut stubs = Vec::new();
        loop {
            let Some(pending) = self.state.lock().pending_references.pop_front() else {
                break;
            };
            let values = pending.binding.property_values();

            let mut guard = self.state.lock();
            if guard.identifier.is_none() {
                break;
            }
            let mut references = References {
                state: &mut *guard,
                source_url_prefix: &self.source_url_prefix,
                engine,
            };
            let target = StubTarget::Reference {
                owner: &pending.owner,
                instance: pending.id,
            };
            stubs.push(references.stub_for(&pending.binding, target, values));
        }
        stubs
    }

    fn report(&self, channel: &str, err: &BridgeError) {
        match err {
            BridgeError::MalformedMessage(reason) => {
                trace!(channel, "message dropped: {}", reason)
            }
            err if err.is_protocol_anomaly() => warn!(channel, "message dropped: {}", err),
            err => error!(channel, "native call failed: {}", err),
        }
    }
}

impl MessageHandler for ChannelInner {
    fn did_receive(&self, message: ScriptMessage) {
        let channel = message.name.clone();
        if let Err(err) = self.dispatch(message, false) {
            self.report(&channel, &err);
        }
    }

    fn did_receive_sync(&self, message: ScriptMessage) -> String {
        let channel = message.name.clone();
        match self.dispatch(message, true) {
            Ok(Some(value)) => self.expression(&value),
            Ok(None) => "undefined".to_owned(),
            Err(err) => {
                self.report(&channel, &err);
                if err.surfaces_to_caller() {
                    format!(
                        "(function() {{ throw new Error({}); }})()",
                        serialize::quote(&err.to_string())
                    )
                } else {
                    "undefined".to_owned()
                }
            }
        }
    }
}

impl CallbackSink for ChannelInner {
    fn complete(&self, id: u64, outcome: Result<ScriptValue, String>) -> Result<(), BridgeError> {
        let context = self.context()?;
        let (error, result) = match outcome {
            Ok(value) => ("null".to_owned(), self.expression(&value)),
            Err(message) => (
                format!("new Error({})", serialize::quote(&message)),
                "undefined".to_owned(),
            ),
        };
        context
            .evaluate(&format!("{}.complete({}, {}, {})", SCRIPT_GLOBAL, id, error, result))
            .map(|_| ())
    }
}

/// Reference resolver over a locked channel state.
///
/// Allocates a negative-id BindingObject the first time an object is
/// serialized and queues it for stub generation.
///
/// A reference holds its native object strongly until the script disposes
/// its proxy or the channel unbinds. Objects that keep crossing as fresh
/// values therefore accumulate ids.
struct References<'a> {
    state: &'a mut ChannelState,
    source_url_prefix: &'a str,
    engine: EngineLiteral<'a>,
}

impl References<'_> {
    /// `values` are the binding's property values, read before locking.
    fn stub_for(
        &mut self,
        binding: &BindingObject,
        target: StubTarget<'_>,
        values: Vec<(String, ScriptValue)>,
    ) -> ScriptSource {
        let engine = self.engine;
        let mut literals = BTreeMap::new();
        for (name, value) in values {
            let literal = Serializer::new(self).with_engine(engine).serialize(&value);
            literals.insert(name, literal);
        }

        let channel = self.state.identifier.clone().unwrap_or_default();
        let stub = Stub {
            channel: &channel,
            target,
            meta: binding.meta(),
            plugin: binding.object().plugin(),
            values: &literals,
            source_url_prefix: self.source_url_prefix,
        };
        ScriptSource::new(stub.generate(), stub.source_url()).with_namespace(binding.namespace())
    }
}

impl ReferenceResolver for References<'_> {
    fn namespace_of(&mut self, object: &NativeRef) -> String {
        if let Some(binding) = self
            .state
            .references
            .get(&object.identity())
            .and_then(|id| self.state.instances.get(id))
        {
            return binding.namespace().to_owned();
        }
        if self.state.identifier.is_none() {
            return serialize::NoReferences.namespace_of(object);
        }

        let id = self.state.next_reference;
        self.state.next_reference -= 1;
        let owner = self.state.namespace.clone();
        let namespace = format!("{}[{}]", owner, id);
        let binding = Arc::new(BindingObject::new(namespace.clone(), object.clone()));
        self.state.instances.insert(id, binding.clone());
        self.state.references.insert(object.identity(), id);
        self.state
            .pending_references
            .push_back(PendingReference { id, owner, binding });
        debug!(instance = id, namespace = %namespace, "native reference bound");
        namespace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::SerialQueue;
    use crate::fixtures::{Counter, Echo, Greeter, Journal, Mirror, Raw, Recorder, Registry};
    use crate::loopback::LoopbackContext;
    use serde_json::json;

    fn options() -> ChannelOptions {
        ChannelOptions::default()
            .with_affinity(SerialQueue::new("test.channel").unwrap().into())
    }

    fn bind<T: crate::plugin::Exported>(
        context: &Arc<LoopbackContext>,
        object: Arc<T>,
        namespace: &str,
    ) -> ChannelHandle {
        load_plugin(context, NativeRef::new(object), namespace, options()).unwrap()
    }

    #[test]
    fn bind_registers_handler_and_injects_stub() {
        let context = LoopbackContext::new();
        let handle = bind(&context, Arc::new(Greeter::default()), "greeter");

        assert!(context.has_handler(handle.identifier()));
        assert_eq!(handle.namespace(), "greeter");
        let injected = context.injected();
        assert_eq!(injected.len(), 1);
        assert!(injected[0].source.contains("createPlugin("));
        assert_eq!(injected[0].filename, "io.latch.plugin.Greeter.js");
        assert_eq!(injected[0].namespace.as_deref(), Some("greeter"));
    }

    #[test]
    fn sequence_identifiers_increase() {
        let context = LoopbackContext::new();
        let a = bind(&context, Arc::new(Greeter::default()), "a");
        let b = bind(&context, Arc::new(Greeter::default()), "b");
        let a: u64 = a.identifier().parse().unwrap();
        let b: u64 = b.identifier().parse().unwrap();
        assert!(b > a);
    }

    #[test]
    fn self_declared_identifier_wins() {
        let context = LoopbackContext::new();
        let handle = bind(&context, Arc::new(Raw::default()), "raw");
        assert_eq!(handle.identifier(), "raw-channel");
    }

    #[test]
    fn rebinding_fails_and_empty_namespace_is_rejected() {
        let context = LoopbackContext::new();
        let handle = bind(&context, Arc::new(Greeter::default()), "greeter");
        let again = handle
            .channel()
            .bind(NativeRef::from_value(Greeter::default()), "other");
        assert_eq!(
            again.unwrap_err(),
            BridgeError::AlreadyBound {
                identifier: handle.identifier().to_owned()
            }
        );

        let channel = Channel::new(&context, options()).unwrap();
        assert_eq!(
            channel
                .bind(NativeRef::from_value(Greeter::default()), "")
                .unwrap_err(),
            BridgeError::EmptyNamespace
        );
    }

    #[test]
    fn failed_injection_fails_the_bind() {
        let context = LoopbackContext::new();
        context.reject_injection(true);
        let channel = Channel::new(&context, options()).unwrap();
        let result = channel.bind(NativeRef::from_value(Greeter::default()), "greeter");
        assert!(matches!(result, Err(BridgeError::Evaluation(_))));
        assert!(!channel.is_bound());
        assert_eq!(context.handler_count(), 0);
    }

    #[test]
    fn released_context_is_reported() {
        let context = LoopbackContext::new();
        let channel = Channel::new(&context, options()).unwrap();
        drop(context);
        assert_eq!(
            channel
                .bind(NativeRef::from_value(Greeter::default()), "greeter")
                .unwrap_err(),
            BridgeError::ContextReleased
        );
    }

    #[test]
    fn method_calls_arrive_once_and_in_order() {
        let context = LoopbackContext::new();
        let recorder = Arc::new(Recorder::default());
        let handle = bind(&context, recorder.clone(), "rec");

        for i in 0..20 {
            context.post(handle.identifier(), json!({"$opcode": "record", "$operand": [i, "x"]}));
        }
        handle.channel().flush().unwrap();

        let calls = recorder.calls();
        assert_eq!(calls.len(), 20);
        for (i, args) in calls.iter().enumerate() {
            assert_eq!(args, &vec![ScriptValue::from(i as i64), ScriptValue::from("x")]);
        }
    }

    #[test]
    fn native_calls_run_on_the_channel_affinity() {
        let context = LoopbackContext::new();
        let recorder = Arc::new(Recorder::default());
        let handle = bind(&context, recorder.clone(), "rec");

        context.post(handle.identifier(), json!({"$opcode": "record", "$operand": []}));
        handle.channel().flush().unwrap();
        assert_eq!(recorder.threads(), vec!["test.channel".to_owned()]);
    }

    #[test]
    fn property_writes_reach_the_setter() {
        let context = LoopbackContext::new();
        let greeter = Arc::new(Greeter::default());
        let handle = bind(&context, greeter.clone(), "greeter");

        context.post(handle.identifier(), json!({"$opcode": "greeting", "$operand": "hi"}));
        context.post(handle.identifier(), json!({"$opcode": "version", "$operand": 9}));
        handle.channel().flush().unwrap();
        assert_eq!(greeter.greeting(), "hi");
    }

    #[test]
    fn sync_calls_return_literals() {
        let context = LoopbackContext::new();
        let handle = bind(&context, Arc::new(Greeter::default()), "greeter");
        let reply = context.post_sync(
            handle.identifier(),
            json!({"$opcode": "greet", "$operand": ["a\"b"]}),
        );
        assert_eq!(reply, r#""hello, a\"b""#);
    }

    #[test]
    fn sync_failures_throw_and_anomalies_are_undefined() {
        let context = LoopbackContext::new();
        let handle = bind(&context, Arc::new(Greeter::default()), "greeter");

        let reply = context.post_sync(
            handle.identifier(),
            json!({"$opcode": "fail", "$operand": ["broken"]}),
        );
        assert_eq!(
            reply,
            r#"(function() { throw new Error("native invocation failed: broken"); })()"#
        );

        let reply = context.post_sync(handle.identifier(), json!({"$opcode": "nothing"}));
        assert_eq!(reply, "undefined");

        let reply = context.post_sync(
            handle.identifier(),
            json!({"$opcode": "greet", "$operand": [1, 2, 3]}),
        );
        assert!(reply.contains("throw new Error"));
    }

    #[test]
    fn returned_objects_become_stable_references() {
        let context = LoopbackContext::new();
        let handle = bind(&context, Arc::new(Registry::default()), "registry");

        // -1 went to the `favorite` property at bind time.
        let first = context.post_sync(handle.identifier(), json!({"$opcode": "child"}));
        assert!(first.starts_with("(function() {\n"));
        assert!(first.contains("LatchScripting.createReference("));
        assert!(first.ends_with("return registry[-2];\n})()"));

        let second = context.post_sync(handle.identifier(), json!({"$opcode": "child"}));
        assert_eq!(second, "registry[-2]");

        let fresh = context.post_sync(handle.identifier(), json!({"$opcode": "make"}));
        assert!(fresh.contains("return registry[-3];"));

        assert_eq!(handle.channel().instance_ids(), vec![-3, -2, -1, 0]);
    }

    #[test]
    fn references_can_be_called_through_their_id() {
        let context = LoopbackContext::new();
        let handle = bind(&context, Arc::new(Registry::default()), "registry");
        context.post_sync(handle.identifier(), json!({"$opcode": "child"}));

        let reply = context.post_sync(
            handle.identifier(),
            json!({"$opcode": "greet", "$target": -2, "$operand": ["ref"]}),
        );
        assert_eq!(reply, r#""hello, ref""#);

        context.post(handle.identifier(), json!({"$opcode": "-", "$target": -2}));
        assert!(handle.channel().instance(-2).is_none());
    }

    #[test]
    fn create_then_dispose_leaves_the_principal() {
        let context = LoopbackContext::new();
        let handle = bind(&context, Arc::new(Counter::new(0)), "Counter");
        let id = handle.identifier().to_owned();

        context.post(&id, json!({"$opcode": "+", "$target": 7, "$operand": [41]}));
        let created = handle.channel().instance(7).expect("instance 7 exists");
        assert_eq!(created.namespace(), "Counter[7]");
        assert_eq!(created.get_property("value"), Ok(41.into()));

        context.post(&id, json!({"$opcode": "increment", "$target": 7, "$operand": [1]}));
        handle.channel().flush().unwrap();
        assert_eq!(created.get_property("value"), Ok(42.into()));

        context.post(&id, json!({"$opcode": "-", "$target": 7}));
        assert!(handle.channel().instance(7).is_none());
        assert!(handle.channel().instance(0).is_some());
        assert!(handle.channel().is_bound());
    }

    #[test]
    fn duplicate_create_overwrites_the_previous_instance() {
        let context = LoopbackContext::new();
        let handle = bind(&context, Arc::new(Counter::new(0)), "Counter");
        let id = handle.identifier().to_owned();

        context.post(&id, json!({"$opcode": "+", "$target": 3, "$operand": [1]}));
        let first = handle.channel().instance(3).unwrap();
        context.post(&id, json!({"$opcode": "+", "$target": 3, "$operand": [2]}));
        let second = handle.channel().instance(3).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.get_property("value"), Ok(2.into()));
        assert_eq!(handle.channel().instance_ids(), vec![0, 3]);
    }

    #[test]
    fn create_on_a_plain_plugin_is_rejected() {
        let context = LoopbackContext::new();
        let handle = bind(&context, Arc::new(Greeter::default()), "greeter");
        context.post(handle.identifier(), json!({"$opcode": "+", "$target": 1}));
        context.post(handle.identifier(), json!({"$opcode": "+", "$target": 0}));
        assert_eq!(handle.channel().instance_ids(), vec![0]);
    }

    #[test]
    fn disposing_the_principal_unbinds() {
        let context = LoopbackContext::new();
        let handle = bind(&context, Arc::new(Greeter::default()), "greeter");
        let id = handle.identifier().to_owned();

        context.post(&id, json!({"$opcode": "-", "$target": 0}));
        assert!(!context.has_handler(&id));
        assert!(!handle.channel().is_bound());
        assert!(handle.channel().instance_ids().is_empty());
        // Undeliverable now.
        assert!(!context.post(&id, json!({"$opcode": "greet", "$operand": ["x"]})));
    }

    #[test]
    fn unbind_is_idempotent() {
        let context = LoopbackContext::new();
        let handle = bind(&context, Arc::new(Greeter::default()), "greeter");
        handle.unbind();
        handle.unbind();
        assert!(handle.channel().identifier().is_none());
        assert_eq!(context.handler_count(), 0);
    }

    #[test]
    fn unknown_or_malformed_messages_change_nothing() {
        let context = LoopbackContext::new();
        let handle = bind(&context, Arc::new(Counter::new(0)), "Counter");
        let id = handle.identifier().to_owned();
        context.post(&id, json!({"$opcode": "+", "$target": 2, "$operand": [5]}));

        context.post(&id, json!({"$target": 2, "$operand": [1]}));
        context.post(&id, json!("free text"));
        context.post_undefined(&id);
        context.post(&id, json!({"$opcode": "nope", "$target": 2}));
        context.post(&id, json!({"$opcode": "increment", "$target": 99, "$operand": [1]}));
        context.post(&id, json!({"$opcode": "-", "$target": 42}));
        handle.channel().flush().unwrap();

        assert_eq!(handle.channel().instance_ids(), vec![0, 2]);
        let instance = handle.channel().instance(2).unwrap();
        assert_eq!(instance.get_property("value"), Ok(5.into()));
    }

    #[test]
    fn raw_messages_reach_a_claiming_principal() {
        let context = LoopbackContext::new();
        let raw = Arc::new(Raw::default());
        let handle = bind(&context, raw.clone(), "raw");

        context.post(handle.identifier(), json!({"hello": "there"}));
        context.post(handle.identifier(), json!({"$opcode": "ping", "$target": 5}));
        handle.channel().flush().unwrap();

        let received = raw.received();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].body, Some(json!({"hello": "there"})));
        assert_eq!(received[1].name, "raw-channel");
    }

    #[test]
    fn channels_of_one_type_share_meta_but_not_instances() {
        let context = LoopbackContext::new();
        let a = bind(&context, Arc::new(Counter::new(0)), "A");
        let b = bind(&context, Arc::new(Counter::new(0)), "B");

        assert!(Arc::ptr_eq(&a.channel().meta().unwrap(), &b.channel().meta().unwrap()));

        context.post(a.identifier(), json!({"$opcode": "+", "$target": 1, "$operand": [0]}));
        assert_eq!(a.channel().instance_ids(), vec![0, 1]);
        assert_eq!(b.channel().instance_ids(), vec![0]);
    }

    #[test]
    fn property_stubs_carry_current_values() {
        let context = LoopbackContext::new();
        let greeter = Arc::new(Greeter::default());
        greeter.set_greeting("howdy");
        bind(&context, greeter, "greeter");
        let stub = &context.injected()[0].source;
        assert!(stub.contains(
            "LatchScripting.defineProperty(exports, \"greeting\", function() { return \"howdy\"; }, true);"
        ));
        assert!(stub.contains(
            "LatchScripting.defineProperty(exports, \"version\", function() { return 1; }, false);"
        ));
    }

    #[test]
    fn reference_properties_inject_their_stubs_after_the_principal() {
        let context = LoopbackContext::new();
        bind(&context, Arc::new(Registry::default()), "registry");
        let injected = context.injected();
        assert_eq!(injected.len(), 2);
        assert!(injected[0].source.contains("function() { return registry[-1]; }"));
        assert!(injected[1].source.contains("LatchScripting.createReference("));
        assert_eq!(injected[1].namespace.as_deref(), Some("registry[-1]"));
    }

    #[test]
    fn initializers_run_on_the_affinity_behind_queued_calls() {
        let context = LoopbackContext::new();
        let handle = bind(&context, Arc::new(Journal), "Journal");
        let id = handle.identifier().to_owned();

        context.post(&id, json!({"$opcode": "work"}));
        context.post(&id, json!({"$opcode": "+", "$target": 1}));

        assert!(handle.channel().instance(1).is_some());
        assert_eq!(
            Journal::entries(),
            vec!["work done".to_owned(), "init on test.channel".to_owned()]
        );
    }

    #[test]
    fn property_getters_may_reenter_the_channel() {
        let context = LoopbackContext::new();
        let mirror = Arc::new(Mirror::default());
        let handle = bind(&context, mirror.clone(), "mirror");
        mirror.attach(handle.channel().clone());

        let reply = context.post_sync(handle.identifier(), json!({"$opcode": "reflect"}));
        assert!(reply.contains(r#"function() { return "7"; }"#), "{}", reply);
        assert!(reply.ends_with("return mirror[-1];\n})()"));
    }

    #[test]
    fn references_live_until_the_script_disposes_them() {
        let context = LoopbackContext::new();
        let handle = bind(&context, Arc::new(Registry::default()), "registry");
        let id = handle.identifier().to_owned();

        for _ in 0..3 {
            context.post_sync(&id, json!({"$opcode": "make"}));
        }
        assert_eq!(handle.channel().instance_ids(), vec![-4, -3, -2, -1, 0]);

        context.post(&id, json!({"$opcode": "-", "$target": -3}));
        assert_eq!(handle.channel().instance_ids(), vec![-4, -2, -1, 0]);
    }

    #[test]
    fn callbacks_complete_node_style_through_the_context() {
        let context = LoopbackContext::new();
        let handle = bind(&context, Arc::new(Echo), "echo");
        let id = handle.identifier().to_owned();

        context.post(&id, json!({"$opcode": "echo", "$operand": ["hi", {"$callback": 1}]}));
        context.post(&id, json!({"$opcode": "echo", "$operand": [null, {"$callback": 2}]}));
        handle.channel().flush().unwrap();

        assert_eq!(
            context.evaluated(),
            vec![
                r#"LatchScripting.complete(1, null, "hi")"#.to_owned(),
                r#"LatchScripting.complete(2, new Error("nothing to echo"), undefined)"#.to_owned(),
            ]
        );
    }

    #[test]
    fn non_integral_targets_are_dropped() {
        let context = LoopbackContext::new();
        let handle = bind(&context, Arc::new(Counter::new(0)), "Counter");
        let id = handle.identifier().to_owned();

        context.post(&id, json!({"$opcode": "+", "$target": 1.5, "$operand": [1]}));
        assert_eq!(handle.channel().instance_ids(), vec![0]);
        let reply = context.post_sync(&id, json!({"$opcode": "value", "$target": 0.5}));
        assert_eq!(reply, "undefined");
    }

    #[test]
    fn handles_debug_as_their_binding() {
        let context = LoopbackContext::new();
        let handle = bind(&context, Arc::new(Greeter::default()), "greeter");
        let rendered = format!("{:?}", handle);
        assert!(rendered.contains("ChannelHandle"));
        assert!(rendered.contains("\"greeter\""));
        assert!(format!("{:?}", handle.channel()).contains("test.channel"));
    }
}
