//! Host embedding layer for a JavaScript engine.
//!
//! Hosts use this crate to expose native data and behavior to script:
//! - [`ContextGroup`]s own a heap; [`GlobalContext`]s are global objects living in a group
//! - [`Class`]es describe native object types: a parent chain, static property tables and
//!   optional callbacks for every object operation
//! - [`Context`] is the active view of a context; all object operations and host callbacks go
//!   through it
//! - [`PropertyNameAccumulator`] / [`PropertyNameArray`] collect and snapshot enumerated names
//! - protect/unprotect, persistent roots, external references and [`ManagedValue`] let the host
//!   cooperate with the collector
//!
//! # Rooting and handle validity
//!
//! Objects are referenced using stable handles ([`GcObject`]). A handle contains
//! `{ index, generation }` plus the tag of the heap that allocated it; the `generation` is
//! incremented every time the slot is freed.
//!
//! This means:
//! - Handles are plain data and stay stable across heap growth; objects never move.
//! - A handle becomes invalid once the object is collected; future allocations may reuse the same
//!   slot index with a newer generation.
//! - Public APIs that dereference handles validate them and return [`VmError::InvalidHandle`] for
//!   stale handles and [`VmError::ForeignHandle`] for handles of another group.
//! - During GC, encountering a stale handle in a root set indicates a bug; this crate will
//!   `debug_assert!` and ignore it.
//!
//! The GC traces from these root sets:
//! - **Stack roots**: objects created through a [`Context`] and the objects its operations return.
//!   They are popped when the `Context` (or a [`Context::scope`]) ends. Operands are rooted only
//!   while their operation runs.
//! - **Persistent roots**: [`Heap::add_root`] / [`Heap::remove_root`], or the RAII
//!   [`PersistentRoot`]. Every [`GlobalContext`] roots its global object this way.
//! - **Protected values**: counted pins from [`Context::protect`].
//! - **Host roots**: [`Heap::add_host_root`], which make every external edge leaving a host node
//!   a root.
//!
//! Finalizers run after the sweep that reclaimed their object, or when the heap is torn down.

mod class;
mod context;
mod dispatch;
mod error;
mod external;
mod group;
mod handle;
mod heap;
mod managed;
mod names;
mod object;
mod property;
mod string;
mod value;

pub use crate::class::CallAsConstructorCallback;
pub use crate::class::CallAsFunctionCallback;
pub use crate::class::Class;
pub use crate::class::ClassAttributes;
pub use crate::class::ClassChain;
pub use crate::class::ClassDefinition;
pub use crate::class::ClassId;
pub use crate::class::ClassOperation;
pub use crate::class::ConvertToTypeCallback;
pub use crate::class::DeletePropertyCallback;
pub use crate::class::FinalizeCallback;
pub use crate::class::Finalizer;
pub use crate::class::GetPropertyCallback;
pub use crate::class::GetPropertyNamesCallback;
pub use crate::class::HasInstanceCallback;
pub use crate::class::HasPropertyCallback;
pub use crate::class::InitializeCallback;
pub use crate::class::SetPropertyCallback;
pub use crate::class::StaticFunction;
pub use crate::class::StaticValue;
pub use crate::class::CLASS_DEFINITION_VERSION;
pub use crate::class::MAX_CLASS_CHAIN;
pub use crate::context::Context;
pub use crate::context::GlobalContext;
pub use crate::error::swallow_exception;
pub use crate::error::VmError;
pub use crate::external::ExternalNode;
pub use crate::external::HostKey;
pub use crate::group::ContextGroup;
pub use crate::group::DeferredTask;
pub use crate::group::GroupOptions;
pub use crate::handle::GcObject;
pub use crate::handle::HeapId;
pub use crate::handle::HeapTag;
pub use crate::handle::RootId;
pub use crate::handle::WeakGcObject;
pub use crate::heap::CollectionMode;
pub use crate::heap::Heap;
pub use crate::heap::HeapLimits;
pub use crate::heap::MAX_PROTOTYPE_CHAIN;
pub use crate::managed::ManagedValue;
pub use crate::managed::PersistentRoot;
pub use crate::names::PropertyNameAccumulator;
pub use crate::names::PropertyNameArray;
pub use crate::property::PropertyAttributes;
pub use crate::string::JsString;
pub use crate::value::JsType;
pub use crate::value::Value;
