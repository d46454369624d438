use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::debug;

use crate::binary::Decoder;
use crate::error::{CodecError, Result};
use crate::packet::{Ping, PingReply};
use crate::serializable::Serializable;
use crate::tag::Tag;

/// Factory producing a default instance of one concrete type.
pub type Constructor = Arc<dyn Fn() -> Box<dyn Serializable> + Send + Sync>;

/// What the registry knows about one tag.
#[derive(Clone)]
pub struct TypeInfo {
    constructor: Option<Constructor>,
    parent: Tag,
    name: String,
}

impl TypeInfo {
    pub fn parent(&self) -> Tag {
        self.parent
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Abstract types have no constructor and cannot be decoded directly.
    pub fn is_abstract(&self) -> bool {
        self.constructor.is_none()
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("abstract", &self.is_abstract())
            .finish()
    }
}

/// Tag-keyed table of constructors and parent links.
///
/// Registration happens once at startup through `&mut self`; afterwards the
/// registry is shared read-only (typically behind an `Arc`).
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<Tag, TypeInfo>,
    native: RwLock<HashMap<TypeId, Tag>>,
}

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in heartbeat and packet base types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_builtins();
        registry
    }

    fn register_builtins(&mut self) {
        let builtins = [
            (Tag::PING, Tag::UNKNOWN, "Ping", Some(constructor::<Ping>())),
            (Tag::PING_REPLY, Tag::UNKNOWN, "PingReply", Some(constructor::<PingReply>())),
            (Tag::TRACKABLE_PACKET, Tag::UNKNOWN, "TrackablePacket", None),
            (Tag::TRANSACTION_REPLY, Tag::TRACKABLE_PACKET, "TransactionReply", None),
        ];
        for (tag, parent, name, constructor) in builtins {
            self.types.insert(
                tag,
                TypeInfo {
                    constructor,
                    parent,
                    name: name.to_string(),
                },
            );
        }
    }

    /// Register a concrete type under the tag its default instance reports.
    pub fn register<T>(&mut self, parent: Tag, name: &str) -> Result<Tag>
    where
        T: Serializable + Default + 'static,
    {
        let tag = T::default().tag();
        self.insert(tag, parent, name, Some(constructor::<T>()))?;
        self.remember::<T>(tag);
        Ok(tag)
    }

    /// Register a concrete type with an explicit constructor.
    pub fn register_with<F>(&mut self, tag: Tag, parent: Tag, name: &str, ctor: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Serializable> + Send + Sync + 'static,
    {
        self.insert(tag, parent, name, Some(Arc::new(ctor)))
    }

    /// Register an abstract base type: it can be a parent but never decoded.
    pub fn register_abstract(&mut self, tag: Tag, parent: Tag, name: &str) -> Result<()> {
        self.insert(tag, parent, name, None)
    }

    fn insert(
        &mut self,
        tag: Tag,
        parent: Tag,
        name: &str,
        constructor: Option<Constructor>,
    ) -> Result<()> {
        if tag == Tag::UNKNOWN {
            return Err(CodecError::Invalid("tag 0 is reserved for Unknown".to_string()));
        }
        if self.types.contains_key(&tag) {
            return Err(CodecError::DuplicateTag(tag));
        }
        debug!(%tag, %parent, name, abstract_type = constructor.is_none(), "type registered");
        self.types.insert(
            tag,
            TypeInfo {
                constructor,
                parent,
                name: name.to_string(),
            },
        );
        Ok(())
    }

    fn remember<T: 'static>(&self, tag: Tag) {
        self.native
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<T>(), tag);
    }

    /// The tag of a native type, memoized after the first lookup.
    pub fn resolve_tag<T>(&self) -> Tag
    where
        T: Serializable + Default + 'static,
    {
        let cached = self
            .native
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<T>())
            .copied();
        if let Some(tag) = cached {
            return tag;
        }
        let tag = T::default().tag();
        self.remember::<T>(tag);
        tag
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.types.contains_key(&tag)
    }

    pub fn info(&self, tag: Tag) -> Option<&TypeInfo> {
        self.types.get(&tag)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Registered tags with their info, in tag order.
    pub fn entries(&self) -> Vec<(Tag, &TypeInfo)> {
        let mut entries: Vec<_> = self.types.iter().map(|(tag, info)| (*tag, info)).collect();
        entries.sort_by_key(|(tag, _)| *tag);
        entries
    }

    /// Display name of a tag, or `#<n>` when it is not registered.
    pub fn type_name(&self, tag: Tag) -> String {
        match self.types.get(&tag) {
            Some(info) => info.name.clone(),
            None => tag
                .builtin_name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{tag}")),
        }
    }

    /// Build a default instance of the concrete type registered under `tag`.
    pub fn construct(&self, tag: Tag) -> Result<Box<dyn Serializable>> {
        let info = self.types.get(&tag).ok_or(CodecError::UnknownTag(tag))?;
        let constructor = info
            .constructor
            .as_ref()
            .ok_or(CodecError::AbstractTag(tag))?;
        Ok(constructor())
    }

    /// Whether `tag` is `base` or has `base` somewhere up its parent chain.
    pub fn is_assignable(&self, base: Tag, tag: Tag) -> bool {
        if base == tag {
            return true;
        }
        let mut current = tag;
        // Bounded walk: a malformed parent cycle cannot spin forever.
        for _ in 0..=self.types.len() {
            let Some(info) = self.types.get(&current) else {
                return false;
            };
            if info.parent == base {
                return true;
            }
            if info.parent == Tag::UNKNOWN {
                return false;
            }
            current = info.parent;
        }
        false
    }

    /// Decode one object of whatever concrete type the leading tag names.
    pub fn decode(&self, dec: &mut Decoder<'_>) -> Result<Box<dyn Serializable>> {
        let tag = dec.peek_tag()?;
        let mut value = self.construct(tag)?;
        value.decode(dec)?;
        Ok(value)
    }

    /// Decode one object from a complete payload.
    pub fn decode_bytes(&self, payload: &[u8]) -> Result<Box<dyn Serializable>> {
        self.decode(&mut Decoder::new(payload))
    }

    /// Decode one object, requiring its tag to fall in `base`'s subtree.
    pub fn decode_assignable(
        &self,
        base: Tag,
        dec: &mut Decoder<'_>,
    ) -> Result<Box<dyn Serializable>> {
        if !self.contains(base) {
            return Err(CodecError::UnknownTag(base));
        }
        let tag = dec.peek_tag()?;
        if !self.is_assignable(base, tag) {
            return Err(CodecError::NotAssignable { base, tag });
        }
        self.decode(dec)
    }

    /// Decode one object of a statically known, registered type.
    pub fn decode_as<T>(&self, dec: &mut Decoder<'_>) -> Result<T>
    where
        T: Serializable + Default + 'static,
    {
        let expected = self.resolve_tag::<T>();
        if !self.contains(expected) {
            return Err(CodecError::UnknownTag(expected));
        }
        let mut value = T::default();
        value.decode(dec)?;
        Ok(value)
    }
}

fn constructor<T>() -> Constructor
where
    T: Serializable + Default + 'static,
{
    Arc::new(|| Box::new(T::default()) as Box<dyn Serializable>)
}

static GLOBAL: OnceLock<Arc<TypeRegistry>> = OnceLock::new();

/// Install the process-wide registry. Fails if one is already in place,
/// including the built-in default created by an earlier [`global`] call.
///
/// The installed table lives until the process exits.
pub fn install(registry: TypeRegistry) -> Result<Arc<TypeRegistry>> {
    let registry = Arc::new(registry);
    GLOBAL
        .set(Arc::clone(&registry))
        .map_err(|_| CodecError::AlreadyInstalled)?;
    Ok(registry)
}

/// The process-wide registry. Falls back to the built-ins if nothing was
/// installed.
pub fn global() -> Arc<TypeRegistry> {
    Arc::clone(GLOBAL.get_or_init(|| Arc::new(TypeRegistry::with_builtins())))
}
