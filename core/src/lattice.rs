//! Type lattices: registration-time replacement for runtime reflection.
//!
//! A [`TypeLattice`] lists every type a message can be viewed as: the
//! message itself, its base types (nearest first) and the interfaces it
//! implements, directly or through a base. Each entry carries a type-erased
//! projection so the dispatcher can hand a handler registered for
//! `dyn Trackable` or for a base struct a correctly typed reference to the
//! concrete message, without any introspection on the hot path.
//!
//! Lattices are built once per message type through [`Message::describe`]
//! and then only read.

use crate::message::Message;
use smallvec::SmallVec;
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

/// Ancestry deeper than this is truncated.
pub const MAX_LATTICE_DEPTH: usize = 32;

/// Identity of a type, usable for unsized types such as `dyn Trait`.
///
/// Equality and hashing use the [`TypeId`] only; the name is kept for
/// diagnostics and statistics labels.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// The key of `T`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The underlying [`TypeId`].
    #[must_use]
    pub const fn id(&self) -> TypeId {
        self.id
    }

    /// The full type name as reported by [`std::any::type_name`].
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// How a lattice entry relates to the message it was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// The message type itself
    Exact,
    /// A base type; `depth` 1 is the direct parent
    Base {
        /// Distance from the message type
        depth: usize,
    },
    /// An implemented interface, usually a `dyn Trait`
    Interface,
}

impl Relation {
    const fn rank(self) -> usize {
        match self {
            Self::Exact => 0,
            Self::Base { depth } => depth,
            Self::Interface => usize::MAX,
        }
    }
}

/// Moves from one type-erased value to an ancestor value.
type Hop = Arc<dyn for<'a> Fn(&'a (dyn Any + 'static)) -> Option<&'a (dyn Any + 'static)> + Send + Sync>;

/// Final step of a view: from a type-erased value to `&T`.
type Projection<T> = Arc<dyn for<'a> Fn(&'a (dyn Any + 'static)) -> Option<&'a T> + Send + Sync>;

fn hop<F>(f: F) -> Hop
where
    F: for<'a> Fn(&'a (dyn Any + 'static)) -> Option<&'a (dyn Any + 'static)> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn projection<T, F>(f: F) -> Projection<T>
where
    T: ?Sized + 'static,
    F: for<'a> Fn(&'a (dyn Any + 'static)) -> Option<&'a T> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// One type a message can be viewed as.
#[derive(Clone)]
pub struct LatticeEntry {
    key: TypeKey,
    relation: Relation,
    path: SmallVec<[Hop; 2]>,
    // Holds a `Projection<T>` where `T` is the type behind `key`.
    leaf: Arc<dyn Any + Send + Sync>,
}

impl LatticeEntry {
    /// The type this entry stands for.
    #[must_use]
    pub const fn key(&self) -> TypeKey {
        self.key
    }

    /// How this type relates to the message.
    #[must_use]
    pub const fn relation(&self) -> Relation {
        self.relation
    }

    fn project<'a, T: ?Sized + 'static>(&self, value: &'a (dyn Any + 'static)) -> Option<&'a T> {
        let leaf = self.leaf.downcast_ref::<Projection<T>>()?;
        let mut current = value;
        for step in &self.path {
            current = step(current)?;
        }
        leaf(current)
    }
}

impl fmt::Debug for LatticeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatticeEntry")
            .field("key", &self.key)
            .field("relation", &self.relation)
            .field("hops", &self.path.len())
            .finish()
    }
}

/// Collects the ancestry of `N` inside [`Message::describe`].
pub struct LatticeBuilder<N> {
    entries: SmallVec<[LatticeEntry; 4]>,
    depth: usize,
    _message: PhantomData<fn(&N)>,
}

impl<N: Message> LatticeBuilder<N> {
    fn with_depth(depth: usize) -> Self {
        let mut entries = SmallVec::new();
        entries.push(LatticeEntry {
            key: TypeKey::of::<N>(),
            relation: Relation::Exact,
            path: SmallVec::new(),
            leaf: Arc::new(projection::<N, _>(|value| value.downcast_ref::<N>())),
        });
        Self {
            entries,
            depth,
            _message: PhantomData,
        }
    }

    /// Declare `B` as a base type of `N`, reached through `project`.
    ///
    /// Everything `B` declares in its own [`Message::describe`] is folded
    /// in: its bases become deeper bases of `N` and its interfaces become
    /// interfaces of `N`. Types already present keep their nearer path.
    pub fn extends<B: Message>(
        &mut self,
        project: impl for<'a> Fn(&'a N) -> &'a B + Send + Sync + 'static,
    ) -> &mut Self {
        if self.depth >= MAX_LATTICE_DEPTH {
            return self;
        }

        let mut base = LatticeBuilder::<B>::with_depth(self.depth + 1);
        B::describe(&mut base);

        let step = hop(move |value| {
            value
                .downcast_ref::<N>()
                .map(|message| project(message) as &(dyn Any + 'static))
        });

        for entry in base.entries {
            if self.contains_key(entry.key) {
                continue;
            }
            let relation = match entry.relation {
                Relation::Exact => Relation::Base { depth: 1 },
                Relation::Base { depth } => Relation::Base { depth: depth + 1 },
                Relation::Interface => Relation::Interface,
            };
            let mut path = SmallVec::with_capacity(entry.path.len() + 1);
            path.push(Arc::clone(&step));
            path.extend(entry.path);
            self.entries.push(LatticeEntry {
                key: entry.key,
                relation,
                path,
                leaf: entry.leaf,
            });
        }
        self
    }

    /// Declare that `N` implements the interface `T`, usually a `dyn Trait`.
    ///
    /// `project` is normally a plain unsizing function:
    ///
    /// ```ignore
    /// fn as_trackable(shipped: &OrderShipped) -> &(dyn Trackable + 'static) {
    ///     shipped
    /// }
    /// ```
    pub fn implements<T: ?Sized + 'static>(
        &mut self,
        project: impl for<'a> Fn(&'a N) -> &'a T + Send + Sync + 'static,
    ) -> &mut Self {
        let key = TypeKey::of::<T>();
        if self.contains_key(key) {
            return self;
        }
        let leaf = projection::<T, _>(move |value| value.downcast_ref::<N>().map(&project));
        self.entries.push(LatticeEntry {
            key,
            relation: Relation::Interface,
            path: SmallVec::new(),
            leaf: Arc::new(leaf),
        });
        self
    }

    fn contains_key(&self, key: TypeKey) -> bool {
        self.entries.iter().any(|entry| entry.key == key)
    }

    fn build(self) -> TypeLattice {
        let mut entries = self.entries.into_vec();
        // Stable: interfaces keep declaration order.
        entries.sort_by_key(|entry| entry.relation.rank());
        TypeLattice {
            message: TypeKey::of::<N>(),
            entries,
        }
    }
}

/// Frozen, type-erased ancestry of one message type.
#[derive(Clone)]
pub struct TypeLattice {
    message: TypeKey,
    entries: Vec<LatticeEntry>,
}

impl TypeLattice {
    /// Build the lattice of `N` from its [`Message::describe`].
    #[must_use]
    pub fn of<N: Message>() -> Self {
        let mut builder = LatticeBuilder::<N>::with_depth(0);
        N::describe(&mut builder);
        builder.build()
    }

    /// The message type this lattice was built for.
    #[must_use]
    pub const fn message(&self) -> TypeKey {
        self.message
    }

    /// Entries in walk order: exact type, bases nearest first, interfaces.
    #[must_use]
    pub fn entries(&self) -> &[LatticeEntry] {
        &self.entries
    }

    /// Keys in walk order.
    pub fn keys(&self) -> impl Iterator<Item = TypeKey> + '_ {
        self.entries.iter().map(LatticeEntry::key)
    }

    /// Whether the message can be viewed as the type behind `key`.
    #[must_use]
    pub fn contains(&self, key: TypeKey) -> bool {
        self.entry(key).is_some()
    }

    /// How the type behind `key` relates to the message, if at all.
    #[must_use]
    pub fn relation(&self, key: TypeKey) -> Option<Relation> {
        self.entry(key).map(LatticeEntry::relation)
    }

    /// View a message of this lattice's type as `T`.
    ///
    /// Returns `None` when `T` is not part of the lattice or when `value` is
    /// not an instance of the lattice's message type.
    #[must_use]
    pub fn view<'a, T: ?Sized + 'static>(&self, value: &'a (dyn Any + 'static)) -> Option<&'a T> {
        self.entry(TypeKey::of::<T>())?.project(value)
    }

    fn entry(&self, key: TypeKey) -> Option<&LatticeEntry> {
        self.entries.iter().find(|entry| entry.key == key)
    }
}

impl fmt::Debug for TypeLattice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeLattice")
            .field("message", &self.message)
            .field("entries", &self.entries)
            .finish()
    }
}
