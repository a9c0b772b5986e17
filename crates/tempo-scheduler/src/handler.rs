use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::types::JobContext;

/// A live handler host. One instance backs every job whose methods belong to its type.
pub type Instance = Arc<dyn Any + Send + Sync>;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Wrap a value as a shareable handler host.
pub fn instance<T: Any + Send + Sync>(value: T) -> Instance {
    Arc::new(value)
}

/// Identity of a handler host type.
#[derive(Clone, Copy)]
pub struct OwnerType {
    id: TypeId,
    name: &'static str,
}

impl OwnerType {
    pub fn of<T: Any>() -> Self {
        Self { id: TypeId::of::<T>(), name: type_name::<T>() }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True if `instance` is a value of this type.
    pub fn hosts(&self, instance: &Instance) -> bool {
        (**instance).type_id() == self.id
    }
}

impl PartialEq for OwnerType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for OwnerType {}

impl std::hash::Hash for OwnerType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Declared kind of a handler parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    /// Receives the [`JobContext`] of the current firing.
    ExecutionContext,
    /// Anything else. Registration rejects methods that declare one.
    Unsupported(String),
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::ExecutionContext => f.write_str("execution context"),
            ParamKind::Unsupported(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub name: String,
    pub params: Vec<ParamKind>,
}

/// Which method on which host type a job runs.
#[derive(Debug, Clone)]
pub struct HandlerDescriptor {
    pub owner: OwnerType,
    pub method: MethodSignature,
}

impl HandlerDescriptor {
    pub fn requires_context(&self) -> bool {
        self.method.params.contains(&ParamKind::ExecutionContext)
    }

    /// `Owner::method`, for logs.
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.owner.name(), self.method.name)
    }
}

/// A bound argument, positionally matching [`MethodSignature::params`].
#[derive(Debug, Clone)]
pub enum Arg {
    Context(JobContext),
}

impl Arg {
    pub fn as_context(&self) -> Option<&JobContext> {
        match self {
            Arg::Context(ctx) => Some(ctx),
        }
    }
}

/// Type-erased call into a host method.
///
/// Implementations must be `Send + Sync` because one invocable is shared by
/// every firing of its job, and firings run on the blocking pool.
pub trait Invocable: Send + Sync {
    fn invoke(&self, instance: &Instance, args: &[Arg]) -> HandlerResult;
}

struct TypedMethod<T, F> {
    f: F,
    _owner: PhantomData<fn() -> T>,
}

impl<T, F> Invocable for TypedMethod<T, F>
where
    T: Any + Send + Sync,
    F: Fn(&T, &[Arg]) -> HandlerResult + Send + Sync,
{
    fn invoke(&self, instance: &Instance, args: &[Arg]) -> HandlerResult {
        let host = instance
            .downcast_ref::<T>()
            .ok_or_else(|| HandlerError::from(format!("instance is not a {}", type_name::<T>())))?;
        (self.f)(host, args)
    }
}

/// Builds a fresh host instance for registrations that do not supply one.
#[derive(Clone)]
pub struct Constructor {
    owner: OwnerType,
    build: Arc<dyn Fn() -> Instance + Send + Sync>,
}

impl Constructor {
    pub fn default_for<T: Default + Any + Send + Sync>() -> Self {
        Self::from_fn(T::default)
    }

    pub fn from_fn<T, F>(f: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            owner: OwnerType::of::<T>(),
            build: Arc::new(move || Arc::new(f()) as Instance),
        }
    }

    pub fn owner(&self) -> OwnerType {
        self.owner
    }

    /// Run the constructor. A panic is reported as an error message.
    pub fn construct(&self) -> std::result::Result<Instance, String> {
        catch_unwind(AssertUnwindSafe(|| (self.build)())).map_err(panic_message)
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor").field("owner", &self.owner).finish()
    }
}

/// A registrable handler method: its descriptor plus the code that runs it.
#[derive(Clone)]
pub struct JobMethod {
    descriptor: HandlerDescriptor,
    invocable: Arc<dyn Invocable>,
    constructor: Option<Constructor>,
}

impl JobMethod {
    /// A method taking no arguments.
    pub fn new<T, F>(name: impl Into<String>, f: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T) -> HandlerResult + Send + Sync + 'static,
    {
        Self::with_params::<T, _>(name, Vec::new(), move |host, _| f(host))
    }

    /// A method taking the execution context.
    pub fn with_context<T, F>(name: impl Into<String>, f: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T, &JobContext) -> HandlerResult + Send + Sync + 'static,
    {
        Self::with_params::<T, _>(name, vec![ParamKind::ExecutionContext], move |host, args| {
            let ctx = args
                .iter()
                .find_map(Arg::as_context)
                .ok_or_else(|| HandlerError::from("execution context was not bound"))?;
            f(host, ctx)
        })
    }

    /// A method with an explicit parameter list. Arguments arrive in declaration order.
    pub fn with_params<T, F>(name: impl Into<String>, params: Vec<ParamKind>, f: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T, &[Arg]) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            descriptor: HandlerDescriptor {
                owner: OwnerType::of::<T>(),
                method: MethodSignature { name: name.into(), params },
            },
            invocable: Arc::new(TypedMethod { f, _owner: PhantomData::<fn() -> T> }),
            constructor: None,
        }
    }

    /// Let registration build the host when no instance is supplied.
    pub fn constructed_by(mut self, constructor: Constructor) -> Self {
        self.constructor = Some(constructor);
        self
    }

    pub fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    pub fn constructor(&self) -> Option<&Constructor> {
        self.constructor.as_ref()
    }

    pub(crate) fn invocable(&self) -> Arc<dyn Invocable> {
        Arc::clone(&self.invocable)
    }
}

impl fmt::Debug for JobMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobMethod")
            .field("descriptor", &self.descriptor)
            .field("constructor", &self.constructor)
            .finish()
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
