use super::VisitMut;
use serde_json::Value;

/// Recursively visit all leaves (anything that is not an array or an object) mutably
pub trait VisitLeavesMut {
    fn visit_leaves_mut(&mut self, visitor: &mut dyn VisitMut<Value>) {
        self.visit_leaves_mut_to_depth(None, visitor)
    }

    /// Visit leaves at most `max_depth` containers below `self`
    ///
    /// A depth of `Some(0)` only visits `self` if it is a leaf itself. `None` is unlimited.
    fn visit_leaves_mut_to_depth(
        &mut self,
        max_depth: Option<usize>,
        visitor: &mut dyn VisitMut<Value>,
    );
}

impl VisitLeavesMut for Value {
    fn visit_leaves_mut_to_depth(
        &mut self,
        max_depth: Option<usize>,
        visitor: &mut dyn VisitMut<Value>,
    ) {
        let next_depth = match max_depth {
            Some(0) if is_container(self) => return,
            Some(depth) => Some(depth.saturating_sub(1)),
            None => None,
        };

        match self {
            Value::Array(array) => {
                for element in array {
                    element.visit_leaves_mut_to_depth(next_depth, visitor);
                }
            }
            Value::Object(object) => {
                for value in object.values_mut() {
                    value.visit_leaves_mut_to_depth(next_depth, visitor);
                }
            }
            leaf => visitor.visit_mut(leaf),
        }
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Array(_) | Value::Object(_))
}
