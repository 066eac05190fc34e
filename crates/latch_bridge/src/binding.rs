//! BindingObject: one exposed instance reachable from scripts
//!
//! Every operation consults the object's MetaObject first. A name outside
//! the reflected surface fails with `UnknownMember`; there is no fallback to
//! anything the plugin did not declare.

use crate::error::BridgeError;
use crate::meta::{MemberDescriptor, MetaObject};
use crate::value::{NativeRef, ScriptValue};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct BindingObject {
    namespace: String,
    object: NativeRef,
}

impl BindingObject {
    pub(crate) fn new(namespace: impl Into<String>, object: NativeRef) -> Self {
        Self {
            namespace: namespace.into(),
            object,
        }
    }

    /// Construct a script-requested instance through the type's initializer.
    pub(crate) fn construct(
        namespace: impl Into<String>,
        meta: &MetaObject,
        args: Vec<ScriptValue>,
    ) -> Result<Self, BridgeError> {
        let initializer = meta
            .default_member()
            .filter(|member| member.is_initializer())
            .ok_or_else(|| BridgeError::UnknownMember {
                name: format!("{} initializer", meta.type_name()),
            })?;
        let args = initializer.fit_arguments(meta.type_name(), args)?;
        let object = initializer
            .construct(args)
            .ok_or_else(|| BridgeError::UnknownMember {
                name: format!("{} initializer", meta.type_name()),
            })??;
        Ok(Self::new(namespace, object))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn object(&self) -> &NativeRef {
        &self.object
    }

    pub fn meta(&self) -> &Arc<MetaObject> {
        self.object.meta()
    }

    fn member(&self, name: &str) -> Result<&MemberDescriptor, BridgeError> {
        self.meta()
            .lookup(name)
            .ok_or_else(|| BridgeError::UnknownMember {
                name: name.to_owned(),
            })
    }

    pub fn get_property(&self, name: &str) -> Result<ScriptValue, BridgeError> {
        self.member(name)?
            .get(self.object.as_any())
            .ok_or_else(|| BridgeError::UnknownMember {
                name: name.to_owned(),
            })
    }

    pub fn set_property(&self, name: &str, value: ScriptValue) -> Result<(), BridgeError> {
        let member = self.member(name)?;
        if !member.is_property() {
            return Err(BridgeError::UnknownMember {
                name: name.to_owned(),
            });
        }
        member
            .set(self.object.as_any(), value)
            .ok_or_else(|| BridgeError::ReadOnlyProperty {
                name: name.to_owned(),
            })?
    }

    /// Call a method. The empty name reaches a callable default member.
    pub fn invoke(&self, name: &str, args: Vec<ScriptValue>) -> Result<ScriptValue, BridgeError> {
        let member = self.member(name)?;
        if !member.is_method() {
            return Err(BridgeError::UnknownMember {
                name: name.to_owned(),
            });
        }
        let args = member.fit_arguments(name, args)?;
        member
            .call(self.object.as_any(), args)
            .ok_or_else(|| BridgeError::UnknownMember {
                name: name.to_owned(),
            })?
    }

    /// Every property with its current value, in name order.
    pub fn property_values(&self) -> Vec<(String, ScriptValue)> {
        self.meta()
            .iter()
            .filter(|(_, member)| member.is_property())
            .filter_map(|(name, member)| {
                member
                    .get(self.object.as_any())
                    .map(|value| (name.to_owned(), value))
            })
            .collect()
    }
}
