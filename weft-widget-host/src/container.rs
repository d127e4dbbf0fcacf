use std::sync::atomic::{AtomicBool, Ordering};
use weft_types::WidgetId;

/// Host-side mount target for one widget.
///
/// At most one sandbox context can be embedded at a time. Once disposed the
/// container can no longer accept a mount.
#[derive(Debug)]
pub struct WidgetContainer {
    widget_id: WidgetId,
    embedded: AtomicBool,
    disposed: AtomicBool,
}

impl WidgetContainer {
    pub fn new(widget_id: WidgetId) -> Self {
        Self {
            widget_id,
            embedded: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn widget_id(&self) -> &WidgetId {
        &self.widget_id
    }

    /// True if a sandbox context is currently attached.
    pub fn has_embedded_context(&self) -> bool {
        self.embedded.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        self.embedded.store(false, Ordering::Release);
    }

    /// Claims the container. Fails if disposed or already occupied.
    pub(crate) fn try_embed(&self) -> bool {
        !self.is_disposed()
            && self
                .embedded
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    pub(crate) fn release(&self) {
        self.embedded.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeds_once() {
        let c = WidgetContainer::new(WidgetId::from("a"));
        assert!(c.try_embed());
        assert!(!c.try_embed());
        assert!(c.has_embedded_context());
        c.release();
        assert!(c.try_embed());
    }

    #[test]
    fn disposed_container_rejects_embed() {
        let c = WidgetContainer::new(WidgetId::from("a"));
        c.dispose();
        assert!(!c.try_embed());
        assert!(!c.has_embedded_context());
    }
}
