// meta.rs - Reflected member tables for exposed types
//
// Each exposed type is reflected once through `Exported::export` and the
// result is cached for the lifetime of the process. Lookups are by member
// name; the empty name is the default member (initializer or call operator).

use crate::error::BridgeError;
use crate::plugin::Exported;
use crate::value::{NativeRef, ScriptValue};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::any::{type_name, Any, TypeId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

type Receiver = dyn Any + Send + Sync;
type MethodFn = Arc<dyn Fn(&Receiver, Vec<ScriptValue>) -> Result<ScriptValue, BridgeError> + Send + Sync>;
type GetterFn = Arc<dyn Fn(&Receiver) -> ScriptValue + Send + Sync>;
type SetterFn = Arc<dyn Fn(&Receiver, ScriptValue) -> Result<(), BridgeError> + Send + Sync>;
type InitFn = Arc<dyn Fn(Vec<ScriptValue>) -> Result<NativeRef, BridgeError> + Send + Sync>;

/// Process-wide reflection cache keyed by the exposed type.
static META_CACHE: Lazy<DashMap<TypeId, Arc<MetaObject>>> = Lazy::new(DashMap::new);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Method,
    Property,
    Initializer,
}

/// One reflected member: its shape plus the invoker that reaches native code.
#[derive(Clone)]
pub struct MemberDescriptor {
    kind: MemberKind,
    arity: usize,
    variadic: bool,
    returns_value: bool,
    accessor: Accessor,
}

#[derive(Clone)]
enum Accessor {
    Method(MethodFn),
    Property {
        getter: GetterFn,
        setter: Option<SetterFn>,
    },
    Initializer(InitFn),
}

impl MemberDescriptor {
    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    pub fn is_method(&self) -> bool {
        self.kind == MemberKind::Method
    }

    pub fn is_property(&self) -> bool {
        self.kind == MemberKind::Property
    }

    pub fn is_initializer(&self) -> bool {
        self.kind == MemberKind::Initializer
    }

    /// Declared parameter count. Variadic members accept any count.
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    /// Whether script callers wait for a value (synchronous round trip).
    pub fn returns_value(&self) -> bool {
        self.returns_value
    }

    pub fn has_setter(&self) -> bool {
        matches!(&self.accessor, Accessor::Property { setter: Some(_), .. })
    }

    /// Suffix appended to the opcode in generated stubs: `#<arity>`, plus
    /// `s` when the call is a synchronous round trip. Properties have none.
    pub fn type_tag(&self) -> String {
        match self.kind {
            MemberKind::Property => String::new(),
            MemberKind::Initializer => format!("#{}", self.arity),
            MemberKind::Method if self.returns_value => format!("#{}s", self.arity),
            MemberKind::Method => format!("#{}", self.arity),
        }
    }

    /// Check the argument count and pad missing trailing arguments.
    pub(crate) fn fit_arguments(
        &self,
        name: &str,
        mut args: Vec<ScriptValue>,
    ) -> Result<Vec<ScriptValue>, BridgeError> {
        if self.variadic {
            return Ok(args);
        }
        if args.len() > self.arity {
            return Err(BridgeError::ArityMismatch {
                name: name.to_owned(),
                expected: self.arity,
                got: args.len(),
            });
        }
        args.resize(self.arity, ScriptValue::Undefined);
        Ok(args)
    }

    pub(crate) fn call(
        &self,
        receiver: &Receiver,
        args: Vec<ScriptValue>,
    ) -> Option<Result<ScriptValue, BridgeError>> {
        match &self.accessor {
            Accessor::Method(invoke) => Some(invoke(receiver, args)),
            _ => None,
        }
    }

    pub(crate) fn get(&self, receiver: &Receiver) -> Option<ScriptValue> {
        match &self.accessor {
            Accessor::Property { getter, .. } => Some(getter(receiver)),
            _ => None,
        }
    }

    pub(crate) fn set(
        &self,
        receiver: &Receiver,
        value: ScriptValue,
    ) -> Option<Result<(), BridgeError>> {
        match &self.accessor {
            Accessor::Property {
                setter: Some(setter),
                ..
            } => Some(setter(receiver, value)),
            _ => None,
        }
    }

    pub(crate) fn construct(
        &self,
        args: Vec<ScriptValue>,
    ) -> Option<Result<NativeRef, BridgeError>> {
        match &self.accessor {
            Accessor::Initializer(init) => Some(init(args)),
            _ => None,
        }
    }
}

/// Structural equality: invokers are not compared.
impl PartialEq for MemberDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.arity == other.arity
            && self.variadic == other.variadic
            && self.returns_value == other.returns_value
            && self.has_setter() == other.has_setter()
    }
}

impl fmt::Debug for MemberDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberDescriptor")
            .field("kind", &self.kind)
            .field("arity", &self.arity)
            .field("variadic", &self.variadic)
            .field("returns_value", &self.returns_value)
            .field("has_setter", &self.has_setter())
            .finish()
    }
}

/// Immutable reflection of one exposed type.
#[derive(Clone, Debug, PartialEq)]
pub struct MetaObject {
    type_name: &'static str,
    members: BTreeMap<String, MemberDescriptor>,
}

impl MetaObject {
    /// Cached reflection of `T`. Every caller gets the same instance.
    pub fn of<T: Exported>() -> Arc<MetaObject> {
        let key = TypeId::of::<T>();
        if let Some(meta) = META_CACHE.get(&key) {
            return Arc::clone(meta.value());
        }
        // Built outside the map lock; the first insert wins.
        let built = Arc::new(Self::build::<T>());
        let entry = META_CACHE.entry(key).or_insert(built);
        Arc::clone(entry.value())
    }

    /// Reflect `T` without consulting the cache.
    pub fn build<T: Exported>() -> MetaObject {
        let mut builder = MetaBuilder::<T>::new();
        T::export(&mut builder);
        builder.finish()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn lookup(&self, name: &str) -> Option<&MemberDescriptor> {
        self.members.get(name)
    }

    /// The member registered under the empty name, if any.
    pub fn default_member(&self) -> Option<&MemberDescriptor> {
        self.members.get("")
    }

    /// Scripts may construct instances with `new`.
    pub fn is_constructible(&self) -> bool {
        self.default_member()
            .map(MemberDescriptor::is_initializer)
            .unwrap_or(false)
    }

    /// Members in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MemberDescriptor)> {
        self.members.iter().map(|(name, member)| (name.as_str(), member))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Collects the exposed surface of `T` inside [`Exported::export`].
pub struct MetaBuilder<T> {
    members: BTreeMap<String, MemberDescriptor>,
    ambiguous: BTreeSet<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Exported> MetaBuilder<T> {
    fn new() -> Self {
        Self {
            members: BTreeMap::new(),
            ambiguous: BTreeSet::new(),
            _marker: PhantomData,
        }
    }

    /// Method whose result travels back to the script (synchronous round trip).
    pub fn method<F>(&mut self, name: &str, arity: usize, f: F) -> &mut Self
    where
        F: Fn(&T, Vec<ScriptValue>) -> Result<ScriptValue, BridgeError> + Send + Sync + 'static,
    {
        self.insert_method(name, arity, false, true, f)
    }

    /// Method returning a value that accepts any number of arguments.
    pub fn variadic_method<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(&T, Vec<ScriptValue>) -> Result<ScriptValue, BridgeError> + Send + Sync + 'static,
    {
        self.insert_method(name, 0, true, true, f)
    }

    /// Fire-and-forget method; scripts never see a result.
    pub fn command<F>(&mut self, name: &str, arity: usize, f: F) -> &mut Self
    where
        F: Fn(&T, Vec<ScriptValue>) -> Result<(), BridgeError> + Send + Sync + 'static,
    {
        self.insert_method(name, arity, false, false, move |this, args| {
            f(this, args).map(|()| ScriptValue::Undefined)
        })
    }

    /// Fire-and-forget method accepting any number of arguments.
    pub fn variadic_command<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(&T, Vec<ScriptValue>) -> Result<(), BridgeError> + Send + Sync + 'static,
    {
        self.insert_method(name, 0, true, false, move |this, args| {
            f(this, args).map(|()| ScriptValue::Undefined)
        })
    }

    /// Make the plugin object itself callable from scripts.
    pub fn call_as_function<F>(&mut self, arity: usize, f: F) -> &mut Self
    where
        F: Fn(&T, Vec<ScriptValue>) -> Result<ScriptValue, BridgeError> + Send + Sync + 'static,
    {
        self.insert_method("", arity, false, true, f)
    }

    /// Read-only property.
    pub fn property<G>(&mut self, name: &str, getter: G) -> &mut Self
    where
        G: Fn(&T) -> ScriptValue + Send + Sync + 'static,
    {
        let getter = Self::getter(getter);
        self.insert(
            name,
            Self::property_descriptor(Accessor::Property {
                getter,
                setter: None,
            }),
        )
    }

    /// Property scripts may assign to.
    pub fn property_with_setter<G, S>(&mut self, name: &str, getter: G, setter: S) -> &mut Self
    where
        G: Fn(&T) -> ScriptValue + Send + Sync + 'static,
        S: Fn(&T, ScriptValue) -> Result<(), BridgeError> + Send + Sync + 'static,
    {
        let getter = Self::getter(getter);
        let setter: SetterFn = Arc::new(move |receiver: &Receiver, value| {
            downcast_receiver::<T>(receiver).and_then(|this| setter(this, value))
        });
        self.insert(
            name,
            Self::property_descriptor(Accessor::Property {
                getter,
                setter: Some(setter),
            }),
        )
    }

    /// Let scripts construct new instances (`new Plugin(...)`).
    ///
    /// Registers the default member as an initializer, which disables
    /// prebinding in the generated stubs.
    pub fn initializer<F>(&mut self, arity: usize, f: F) -> &mut Self
    where
        F: Fn(Vec<ScriptValue>) -> Result<T, BridgeError> + Send + Sync + 'static,
    {
        let init: InitFn = Arc::new(move |args| f(args).map(NativeRef::from_value));
        self.insert(
            "",
            MemberDescriptor {
                kind: MemberKind::Initializer,
                arity,
                variadic: false,
                returns_value: false,
                accessor: Accessor::Initializer(init),
            },
        )
    }

    fn insert_method<F>(
        &mut self,
        name: &str,
        arity: usize,
        variadic: bool,
        returns_value: bool,
        f: F,
    ) -> &mut Self
    where
        F: Fn(&T, Vec<ScriptValue>) -> Result<ScriptValue, BridgeError> + Send + Sync + 'static,
    {
        let invoke: MethodFn = Arc::new(move |receiver: &Receiver, args| {
            downcast_receiver::<T>(receiver).and_then(|this| f(this, args))
        });
        self.insert(
            name,
            MemberDescriptor {
                kind: MemberKind::Method,
                arity,
                variadic,
                returns_value,
                accessor: Accessor::Method(invoke),
            },
        )
    }

    fn getter<G>(getter: G) -> GetterFn
    where
        G: Fn(&T) -> ScriptValue + Send + Sync + 'static,
    {
        Arc::new(move |receiver: &Receiver| match receiver.downcast_ref::<T>() {
            Some(this) => getter(this),
            None => ScriptValue::Undefined,
        })
    }

    fn property_descriptor(accessor: Accessor) -> MemberDescriptor {
        MemberDescriptor {
            kind: MemberKind::Property,
            arity: 0,
            variadic: false,
            returns_value: true,
            accessor,
        }
    }

    fn insert(&mut self, name: &str, descriptor: MemberDescriptor) -> &mut Self {
        if self.members.insert(name.to_owned(), descriptor).is_some() {
            self.ambiguous.insert(name.to_owned());
        }
        self
    }

    fn finish(mut self) -> MetaObject {
        for name in &self.ambiguous {
            tracing::warn!(
                plugin = type_name::<T>(),
                member = %name,
                "member declared more than once; excluded from the script surface"
            );
            self.members.remove(name);
        }
        MetaObject {
            type_name: type_name::<T>(),
            members: self.members,
        }
    }
}

fn downcast_receiver<T: 'static>(receiver: &Receiver) -> Result<&T, BridgeError> {
    receiver.downcast_ref::<T>().ok_or_else(|| {
        BridgeError::NativeInvocation(format!("receiver is not a {}", type_name::<T>()))
    })
}
