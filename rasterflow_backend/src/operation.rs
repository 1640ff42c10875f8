//! The operation contract and the process-wide operation registry.
//!
//! Every node owns a boxed [`Operation`]. The four [`OperationVariant`]s fix
//! the pad topology and supply default behaviors for region negotiation, so a
//! concrete operation only overrides what it actually changes.

use crate::graph::context::OpCtx;
use crate::graph::NodeId;
use crate::property::{PropertyError, PropertyInfo, Value};
use crate::rect::Rect;
use atomic_refcell::{AtomicRef, AtomicRefCell};
use bitflags::bitflags;
use downcast_rs::{impl_downcast, Downcast};
use dyn_clone::DynClone;
use itertools::Itertools;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Arc, LazyLock};
use strum::EnumIs;
use ustr::{Ustr, UstrMap};

pub mod variants;

static OPERATION_FACTORIES: LazyLock<AtomicRefCell<UstrMap<Arc<dyn OperationFactory>>>> =
    LazyLock::new(|| AtomicRefCell::new(builtin_operations().collect()));

type FactoriesByCategory = BTreeMap<&'static str, Vec<Arc<dyn OperationFactory>>>;
static OPERATION_FACTORIES_BY_CATEGORY: LazyLock<AtomicRefCell<FactoriesByCategory>> =
    LazyLock::new(|| {
        AtomicRefCell::new({
            let mut map: FactoriesByCategory = BTreeMap::new();
            for (_, fac) in builtin_operations() {
                for cat in fac.categories() {
                    map.entry(*cat).or_default().push(fac.clone());
                }
            }
            map
        })
    });

fn builtin_operations() -> impl Iterator<Item = (Ustr, Arc<dyn OperationFactory>)> {
    fn push<T: OperationFactory>(v: &mut Vec<Arc<dyn OperationFactory>>, t: T) {
        v.push(Arc::new(t))
    }

    let mut factories: Vec<Arc<dyn OperationFactory>> = Vec::new();
    let v = &mut factories;

    push(v, crate::operations::nop::NopFactory);
    push(v, crate::operations::buffer_source::BufferSourceFactory);
    push(v, crate::operations::invert::InvertFactory);
    push(v, crate::operations::color_temperature::ColorTemperatureFactory);
    push(v, crate::operations::translate::TranslateFactory);
    push(v, crate::operations::over::OverFactory);
    push(v, crate::operations::difference::DifferenceFactory);
    push(v, crate::operations::write_buffer::WriteBufferFactory);

    factories.into_iter().map(|item| (item.id(), item))
}

pub fn get_operation_factory(id: &Ustr) -> Option<Arc<dyn OperationFactory>> {
    OPERATION_FACTORIES.borrow().get(id).cloned()
}

pub fn all_operation_factories() -> AtomicRef<'static, UstrMap<Arc<dyn OperationFactory>>> {
    OPERATION_FACTORIES.borrow()
}

pub fn operation_factories_by_category() -> AtomicRef<'static, FactoriesByCategory> {
    OPERATION_FACTORIES_BY_CATEGORY.borrow()
}

/// Registers a plug-in operation type, replacing any previous factory with
/// the same id.
pub fn register_operation(factory: Arc<dyn OperationFactory>) {
    for cat in factory.categories() {
        OPERATION_FACTORIES_BY_CATEGORY
            .borrow_mut()
            .entry(cat)
            .or_default()
            .push(factory.clone());
    }
    OPERATION_FACTORIES
        .borrow_mut()
        .insert(factory.id(), factory);
}

/// All registered operation type names, sorted.
pub fn list_operations() -> Vec<Ustr> {
    OPERATION_FACTORIES
        .borrow()
        .keys()
        .copied()
        .sorted_unstable()
        .collect()
}

/// Property introspection by operation type name, without instantiating.
pub fn find_operation_property(operation_type: &Ustr, property: &str) -> Option<PropertyInfo> {
    let factories = OPERATION_FACTORIES.borrow();
    let factory = factories.get(operation_type)?;
    factory
        .properties()
        .iter()
        .find(|info| info.name == property)
        .copied()
}

bitflags! {
    /// Optional capability flags declared by an operation factory.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OperationFlags: u32 {
        /// Results of this operation must never be cached.
        const NO_CACHE = 1 << 0;
        /// The operation ships an OpenCL kernel usable by an OpenCL backend.
        const OPENCL_SUPPORT = 1 << 1;
    }
}

pub trait OperationFactory: Send + Sync + Debug + 'static {
    fn id(&self) -> Ustr;
    fn variant(&self) -> OperationVariant;
    fn create(&self) -> Box<dyn Operation>;

    fn categories(&self) -> &'static [&'static str] {
        &[]
    }

    fn description(&self) -> &'static str {
        ""
    }

    fn flags(&self) -> OperationFlags {
        OperationFlags::empty()
    }

    fn properties(&self) -> &'static [PropertyInfo] {
        &[]
    }
}

/// The pad topology of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIs)]
pub enum OperationVariant {
    Source,
    Filter,
    Composer,
    Sink,
}

impl OperationVariant {
    pub fn input_pad_names(self) -> &'static [&'static str] {
        match self {
            OperationVariant::Source => &[],
            OperationVariant::Filter | OperationVariant::Sink => &["input"],
            OperationVariant::Composer => &["input", "aux"],
        }
    }

    pub fn output_pad_names(self) -> &'static [&'static str] {
        match self {
            OperationVariant::Sink => &[],
            _ => &["output"],
        }
    }
}

pub trait Operation: Debug + DynClone + Downcast + Send + Sync + 'static {
    /// The registered type name, e.g. `rasterflow:invert`.
    fn id(&self) -> Ustr;

    fn variant(&self) -> OperationVariant;

    fn properties(&self) -> &'static [PropertyInfo] {
        &[]
    }

    fn set_property(&mut self, name: Ustr, value: Value) -> Result<(), PropertyError> {
        let _ = value;
        Err(PropertyError::Unknown { name })
    }

    fn get_property(&self, name: Ustr) -> Option<Value> {
        let _ = (name,);
        None
    }

    /// Called once the operation is attached to its node and the variant's
    /// pads exist.
    fn attach(&mut self, node: NodeId) {
        let _ = (node,);
    }

    /// Negotiates pad pixel formats. Runs bottom-up, so input formats are
    /// already published when this is called.
    fn prepare(&self, ctx: OpCtx<'_>) -> miette::Result<()> {
        variants::default_prepare(self.variant(), ctx)
    }

    /// The natural region this operation can produce.
    fn get_defined_region(&self, ctx: OpCtx<'_>) -> Rect {
        variants::default_defined_region(self.variant(), ctx)
    }

    /// Maps a change of `region` on `input_pad` to the output region it
    /// dirties. Identity for point operations.
    fn compute_affected_region(&self, ctx: OpCtx<'_>, input_pad: Ustr, region: Rect) -> Rect {
        let _ = (ctx, input_pad);
        region
    }

    /// Maps a requested output region to the region `input_pad` must supply.
    /// Identity for point operations; geometric operations override.
    fn compute_input_request(&self, ctx: OpCtx<'_>, input_pad: Ustr, roi: Rect) -> Rect {
        let _ = (ctx, input_pad);
        roi
    }

    /// The node that produced the pixel at `(x, y)`.
    fn detect(&self, ctx: OpCtx<'_>, x: i32, y: i32) -> Option<NodeId> {
        variants::default_detect(self.variant(), ctx, x, y)
    }

    /// Produces this evaluation's output for the context's result rect,
    /// binding it to the `output` slot (sinks consume instead).
    fn process(&self, ctx: OpCtx<'_>) -> miette::Result<()>;
}

impl dyn Operation {
    /// Ensures `value` fits the schema before handing it to the setter.
    pub(crate) fn validate_property(&self, name: Ustr, value: &Value) -> Result<(), PropertyError> {
        let Some(info) = self
            .properties()
            .iter()
            .find(|info| info.name == name.as_str())
        else {
            return Err(PropertyError::Unknown { name });
        };
        // ints are accepted where floats are declared
        if info.ty != value.ty() && !(info.ty == crate::property::ValueType::Float && value.is_int())
        {
            return Err(PropertyError::TypeMismatch {
                name,
                expected: info.ty,
                got: value.ty(),
            });
        }
        Ok(())
    }
}

impl_downcast!(Operation);
dyn_clone::clone_trait_object!(Operation);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_builtins() {
        let factory = get_operation_factory(&Ustr::from("rasterflow:invert")).unwrap();
        assert_eq!(factory.variant(), OperationVariant::Filter);
        assert!(get_operation_factory(&Ustr::from("rasterflow:no-such-op")).is_none());
    }

    #[test]
    fn listing_is_sorted_and_complete() {
        let ids = list_operations();
        assert!(ids.windows(2).all(|w| w[0] <= w[1]));
        assert!(ids.contains(&Ustr::from("rasterflow:nop")));
        assert!(ids.contains(&Ustr::from("rasterflow:write-buffer")));
    }

    #[test]
    fn categories_index_builtins() {
        let by_category = operation_factories_by_category();
        let composers = by_category.get("compositors").unwrap();
        assert!(composers.iter().any(|f| f.id().as_str() == "rasterflow:over"));
    }

    #[test]
    fn property_introspection_by_type_name() {
        let info =
            find_operation_property(&Ustr::from("rasterflow:translate"), "x").unwrap();
        assert_eq!(info.ty, crate::property::ValueType::Float);
        assert!(
            find_operation_property(&Ustr::from("rasterflow:translate"), "z").is_none()
        );
    }

    #[test]
    fn variant_pad_topology() {
        assert_eq!(OperationVariant::Composer.input_pad_names(), ["input", "aux"]);
        assert_eq!(OperationVariant::Source.input_pad_names(), &[] as &[&str]);
        assert_eq!(OperationVariant::Sink.output_pad_names(), &[] as &[&str]);
    }
}
