use crate::component::ComponentId;
use serde::{Deserialize, Serialize};

/// Coerced attribute or content value carried by property events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum PropertyValue {
    Text(String),
    Integer(i64),
    Boolean(bool),
    /// Serialized non-domain child elements sharing one tag
    Fragments(Vec<String>),
}

impl PropertyValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ComponentEvent {
    ChildAdded {
        parent: ComponentId,
        child: ComponentId,
        index: usize,
    },
    ChildRemoved {
        parent: ComponentId,
        child: ComponentId,
        index: usize,
    },
    /// The child stayed attached and changed position
    ChildMoved {
        parent: ComponentId,
        child: ComponentId,
        from: usize,
        to: usize,
    },
    ValueChanged {
        component: ComponentId,
    },
    PropertyChanged {
        component: ComponentId,
        property: String,
        old: Option<PropertyValue>,
        new: Option<PropertyValue>,
    },
    RootReplaced {
        old: Option<ComponentId>,
        new: ComponentId,
    },
}

impl ComponentEvent {
    /// Component whose attachment decides whether the event is delivered
    pub fn subject(&self) -> Option<ComponentId> {
        match self {
            Self::ChildAdded { parent, .. }
            | Self::ChildRemoved { parent, .. }
            | Self::ChildMoved { parent, .. } => Some(*parent),
            Self::ValueChanged { component } | Self::PropertyChanged { component, .. } => {
                Some(*component)
            }
            Self::RootReplaced { .. } => None,
        }
    }
}

/// Receives component events synchronously
pub trait ComponentListener {
    fn on_event(&mut self, event: &ComponentEvent);
}

impl<F> ComponentListener for F
where
    F: FnMut(&ComponentEvent),
{
    fn on_event(&mut self, event: &ComponentEvent) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = ComponentEvent::PropertyChanged {
            component: ComponentId(3),
            property: "name".to_string(),
            old: None,
            new: Some(PropertyValue::Text("x".to_string())),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "propertyChanged");
        assert_eq!(json["new"]["type"], "text");
        assert_eq!(json["new"]["value"], "x");
        assert!(json["old"].is_null());
    }

    #[test]
    fn test_subject() {
        let added = ComponentEvent::ChildAdded {
            parent: ComponentId(1),
            child: ComponentId(2),
            index: 0,
        };
        assert_eq!(added.subject(), Some(ComponentId(1)));
        let replaced = ComponentEvent::RootReplaced {
            old: None,
            new: ComponentId(0),
        };
        assert_eq!(replaced.subject(), None);
    }
}
