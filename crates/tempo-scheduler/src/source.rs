use std::any::Any;

use serde::Serialize;

use crate::{
    handler::{Constructor, JobMethod, OwnerType},
    types::JobId,
};

/// One scheduled method of a discovered type.
#[derive(Debug, Clone)]
pub struct DiscoveredJob {
    pub method: JobMethod,
    pub cron: String,
}

/// A handler host type together with its scheduled methods.
#[derive(Debug, Clone)]
pub struct DiscoveredType {
    owner: OwnerType,
    constructor: Option<Constructor>,
    methods: Vec<DiscoveredJob>,
}

impl DiscoveredType {
    /// A type with no constructor. Its methods register only if a host is already installed.
    pub fn new<T: Any>() -> Self {
        Self { owner: OwnerType::of::<T>(), constructor: None, methods: Vec::new() }
    }

    /// A type built with `T::default()` at registration.
    pub fn default_constructible<T: Default + Any + Send + Sync>() -> Self {
        Self::new::<T>().constructed_by(Constructor::default_for::<T>())
    }

    pub fn constructed_by(mut self, constructor: Constructor) -> Self {
        self.constructor = Some(constructor);
        self
    }

    /// Add a method firing on `cron`.
    pub fn job(mut self, method: JobMethod, cron: impl Into<String>) -> Self {
        self.methods.push(DiscoveredJob { method, cron: cron.into() });
        self
    }

    pub fn owner(&self) -> OwnerType {
        self.owner
    }

    pub fn constructor(&self) -> Option<&Constructor> {
        self.constructor.as_ref()
    }

    pub fn methods(&self) -> &[DiscoveredJob] {
        &self.methods
    }
}

/// Supplies handler descriptors for bulk registration.
///
/// `filter` narrows discovery to types whose path starts with the given
/// prefix; `None` or an empty prefix means everything.
pub trait DescriptorSource {
    fn discover(&self, filter: Option<&str>) -> Vec<DiscoveredType>;
}

impl<F> DescriptorSource for F
where
    F: Fn(Option<&str>) -> Vec<DiscoveredType>,
{
    fn discover(&self, filter: Option<&str>) -> Vec<DiscoveredType> {
        self(filter)
    }
}

/// A fixed, in-process list of types.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    types: Vec<DiscoveredType>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, ty: DiscoveredType) -> Self {
        self.types.push(ty);
        self
    }

    pub fn push(&mut self, ty: DiscoveredType) {
        self.types.push(ty);
    }
}

impl DescriptorSource for StaticSource {
    fn discover(&self, filter: Option<&str>) -> Vec<DiscoveredType> {
        self.types
            .iter()
            .filter(|ty| match filter {
                Some(prefix) if !prefix.is_empty() => ty.owner.name().starts_with(prefix),
                _ => true,
            })
            .cloned()
            .collect()
    }
}

/// Outcome of registering a descriptor source.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScheduleReport {
    pub registered: Vec<JobId>,
    pub rejected: usize,
}
