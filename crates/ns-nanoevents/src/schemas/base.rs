use crate::behavior::Behavior;
use crate::error::Result;
use crate::form::Form;

use super::{Schema, base_fields};

/// One top-level field per branch, no collections and no behaviors.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseSchema;

impl Schema for BaseSchema {
    fn name(&self) -> &'static str {
        "base"
    }

    fn build(&self, base: &Form) -> Result<Form> {
        base_fields(base)?;
        Ok(base.clone())
    }

    fn behavior(&self) -> Behavior {
        Behavior::base()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::Primitive;
    use crate::schemas::testing;

    #[test]
    fn passes_base_form_through() {
        let base = testing::base(&[("Jet_pt", Primitive::Float32, 1), ("run", Primitive::Uint32, 0)]);
        assert_eq!(BaseSchema.build(&base).unwrap(), base);
        assert!(BaseSchema.build(&Form::numpy(Primitive::Int32, "x,!load")).is_err());
    }
}
