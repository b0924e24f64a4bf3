//! Caller-supplied hooks: node callbacks and the protobuf type registry

use std::any::Any;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use prost::Message;

use crate::core::data::Payload;
use crate::core::value::Value;
use crate::error::{FormatError, GraphError, Result};
use crate::graph::view::NodeHandle;
use crate::types::DataType;

pub type EqualFn = Arc<dyn Fn(&NodeHandle<'_>, &NodeHandle<'_>) -> bool + Send + Sync>;
pub type CompareFn = Arc<dyn Fn(&NodeHandle<'_>, &NodeHandle<'_>) -> Ordering + Send + Sync>;
pub type CostFn = Arc<dyn Fn(&NodeHandle<'_>, &NodeHandle<'_>) -> f32 + Send + Sync>;

type AnyMessage = Arc<dyn Any + Send + Sync>;
type DecodeFn = Arc<dyn Fn(&[u8]) -> Result<AnyMessage> + Send + Sync>;
type MessageCostFn = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Option<f32> + Send + Sync>;

// ============================================================================
// Decoded payloads
// ============================================================================

/// A protobuf payload decoded through the registry
#[derive(Clone)]
pub struct DecodedMessage {
  pub type_name: String,
  message: AnyMessage,
}

impl DecodedMessage {
  pub fn downcast_ref<M: 'static>(&self) -> Option<&M> {
    self.message.downcast_ref::<M>()
  }
}

impl fmt::Debug for DecodedMessage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DecodedMessage")
      .field("type_name", &self.type_name)
      .finish_non_exhaustive()
  }
}

/// What a node or edge payload reads back as
#[derive(Debug, Clone)]
pub enum DataValue {
  /// Protobuf payload of a registered type
  Message(DecodedMessage),
  /// Any other payload, untouched, with its tag
  Raw(Payload),
}

impl DataValue {
  pub fn kind(&self) -> DataType {
    match self {
      DataValue::Message(_) => DataType::Protobuf,
      DataValue::Raw(payload) => payload.kind,
    }
  }

  /// Decode a raw payload into a [`Value`]
  pub fn value(&self) -> Option<Value> {
    match self {
      DataValue::Raw(payload) => payload.decode_value().ok(),
      DataValue::Message(_) => None,
    }
  }

  pub fn message<M: 'static>(&self) -> Option<&M> {
    match self {
      DataValue::Message(decoded) => decoded.downcast_ref::<M>(),
      DataValue::Raw(_) => None,
    }
  }
}

// ============================================================================
// Type registry
// ============================================================================

#[derive(Clone)]
struct RegisteredType {
  decode: DecodeFn,
  cost: Option<MessageCostFn>,
}

/// Maps protobuf type names to decoders
#[derive(Clone, Default)]
pub struct TypeRegistry {
  types: HashMap<String, RegisteredType>,
}

impl TypeRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `M` under `type_name`
  pub fn register<M>(mut self, type_name: impl Into<String>) -> Self
  where
    M: Message + Default + Send + Sync + 'static,
  {
    self.types.insert(
      type_name.into(),
      RegisteredType {
        decode: decoder::<M>(),
        cost: None,
      },
    );
    self
  }

  /// Register `M` and declare how to read its cost field
  pub fn register_with_cost<M, F>(mut self, type_name: impl Into<String>, cost: F) -> Self
  where
    M: Message + Default + Send + Sync + 'static,
    F: Fn(&M) -> f32 + Send + Sync + 'static,
  {
    let cost: MessageCostFn = Arc::new(move |message: &(dyn Any + Send + Sync)| {
      message.downcast_ref::<M>().map(&cost)
    });
    self.types.insert(
      type_name.into(),
      RegisteredType {
        decode: decoder::<M>(),
        cost: Some(cost),
      },
    );
    self
  }

  pub fn contains(&self, type_name: &str) -> bool {
    self.types.contains_key(type_name)
  }

  pub fn is_empty(&self) -> bool {
    self.types.is_empty()
  }

  /// Decode a protobuf payload
  pub fn decode(&self, payload: &Payload) -> Result<DecodedMessage> {
    if payload.type_name.is_empty() {
      return Err(
        FormatError::InvalidPayload("protobuf payload without a type name".to_string()).into(),
      );
    }
    let entry = self
      .types
      .get(&payload.type_name)
      .ok_or_else(|| GraphError::UnregisteredType(payload.type_name.clone()))?;
    let message = (entry.decode)(&payload.bytes)?;
    Ok(DecodedMessage {
      type_name: payload.type_name.clone(),
      message,
    })
  }

  /// Cost declared by the message's type, if any
  pub fn cost_of(&self, decoded: &DecodedMessage) -> Option<f32> {
    let cost = self.types.get(&decoded.type_name)?.cost.as_ref()?;
    cost(decoded.message.as_ref())
  }

  /// Turn a payload into what accessors hand back
  pub fn resolve(&self, payload: Payload) -> Result<DataValue> {
    match payload.kind {
      DataType::Protobuf => self.decode(&payload).map(DataValue::Message),
      _ => Ok(DataValue::Raw(payload)),
    }
  }
}

fn decoder<M>() -> DecodeFn
where
  M: Message + Default + Send + Sync + 'static,
{
  Arc::new(|bytes: &[u8]| {
    let message = M::decode(bytes)
      .map_err(|e| GraphError::from(FormatError::InvalidPayload(e.to_string())))?;
    Ok(Arc::new(message) as AnyMessage)
  })
}

impl fmt::Debug for TypeRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut names: Vec<&String> = self.types.keys().collect();
    names.sort();
    f.debug_struct("TypeRegistry").field("types", &names).finish()
  }
}

// ============================================================================
// Hooks
// ============================================================================

/// Callbacks and registry shared by every view of a store
#[derive(Clone, Default)]
pub struct GraphHooks {
  pub equal: Option<EqualFn>,
  pub compare: Option<CompareFn>,
  pub cost: Option<CostFn>,
  pub types: TypeRegistry,
}

impl fmt::Debug for GraphHooks {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GraphHooks")
      .field("equal", &self.equal.is_some())
      .field("compare", &self.compare.is_some())
      .field("cost", &self.cost.is_some())
      .field("types", &self.types)
      .finish()
  }
}
