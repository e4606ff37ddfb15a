/// Compute-once cell: runs its initializer on first access, caches the value,
/// and drops the initializer.
///
/// This is not a lock. It is meant for state whose access is already
/// serialized onto the owner thread (the draw scratch), where synchronization
/// would be redundant.
pub struct Lazy<T> {
    value: Option<T>,
    init: Option<Box<dyn FnOnce() -> T + Send>>,
}

impl<T> Lazy<T> {
    pub fn new(init: impl FnOnce() -> T + Send + 'static) -> Self {
        Self {
            value: None,
            init: Some(Box::new(init)),
        }
    }

    /// The cached value, computing it on first call.
    pub fn get(&mut self) -> &mut T {
        if self.value.is_none() {
            let init = self.init.take().expect("initializer present before first use");
            self.value = Some(init());
        }
        self.value.as_mut().expect("value cached after initialization")
    }

    pub fn is_initialized(&self) -> bool {
        self.value.is_some()
    }
}

impl<T> std::fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lazy")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
