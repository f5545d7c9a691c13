//! Process-wide registry of outer instances for inner-type deserializers.
//!
//! Populated by host code before analysis; read-only while a query is being
//! analyzed. The analyzer only checks presence of an entry, the instance
//! itself is consumed at execution time.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

type Registry = RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register the enclosing instance for a type path.
pub fn add_outer_scope(class_name: impl Into<String>, instance: Arc<dyn Any + Send + Sync>) {
    registry()
        .write()
        .expect("outer scope registry poisoned")
        .insert(class_name.into(), instance);
}

/// Look up the enclosing instance registered for a type path.
pub fn get_outer_scope(class_name: &str) -> Option<Arc<dyn Any + Send + Sync>> {
    registry()
        .read()
        .expect("outer scope registry poisoned")
        .get(class_name)
        .cloned()
}

/// The path of the type enclosing `class_name`, if it has one.
pub fn outer_class_name(class_name: &str) -> Option<String> {
    class_name
        .rsplit_once("::")
        .map(|(outer, _)| outer.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outer_name_strips_last_segment() {
        assert_eq!(
            outer_class_name("app::model::Order::Line").as_deref(),
            Some("app::model::Order")
        );
        assert_eq!(outer_class_name("TopLevel"), None);
    }

    #[test]
    fn registered_scopes_are_visible() {
        add_outer_scope("app::model::Order", Arc::new(42_u32));
        assert!(get_outer_scope("app::model::Order").is_some());
        assert!(get_outer_scope("app::model::Missing").is_none());
    }
}
