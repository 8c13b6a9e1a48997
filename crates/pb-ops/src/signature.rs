use std::fmt;

use pb_types::{DType, TypeError};

use crate::config::OpAttrs;
use crate::error::{BridgeError, BridgeResult};

pub const TENSOR_TO_PLASMA: &str = "TensorToPlasma";
pub const PLASMA_TO_TENSOR: &str = "PlasmaToTensor";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgDef {
    pub name: &'static str,
    pub type_spec: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttrDef {
    pub name: &'static str,
    pub type_spec: &'static str,
    pub default: Option<&'static str>,
}

/// Registration signature of a transfer op.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpDef {
    pub name: &'static str,
    pub inputs: Vec<ArgDef>,
    pub outputs: Vec<ArgDef>,
    pub attrs: Vec<AttrDef>,
}

const fn arg(name: &'static str, type_spec: &'static str) -> ArgDef {
    ArgDef { name, type_spec }
}

const fn attr(name: &'static str, type_spec: &'static str) -> AttrDef {
    AttrDef {
        name,
        type_spec,
        default: None,
    }
}

impl OpDef {
    pub fn tensor_to_plasma() -> Self {
        Self {
            name: TENSOR_TO_PLASMA,
            inputs: vec![
                arg("input_tensor", "dtypes"),
                arg("plasma_object_id", "string"),
            ],
            outputs: Vec::new(),
            attrs: vec![
                attr("dtypes", "list(type)"),
                attr("plasma_store_socket_name", "string"),
                attr("plasma_manager_socket_name", "string"),
            ],
        }
    }

    pub fn plasma_to_tensor() -> Self {
        Self {
            name: PLASMA_TO_TENSOR,
            inputs: vec![arg("plasma_object_id", "string")],
            outputs: vec![arg("tensor", "dtype")],
            attrs: vec![
                AttrDef {
                    name: "dtype",
                    type_spec: "type",
                    default: Some("float32"),
                },
                attr("plasma_store_socket_name", "string"),
                attr("plasma_manager_socket_name", "string"),
            ],
        }
    }

    pub fn all() -> [OpDef; 2] {
        [Self::tensor_to_plasma(), Self::plasma_to_tensor()]
    }

    pub fn find(name: &str) -> Option<OpDef> {
        Self::all().into_iter().find(|def| def.name == name)
    }

    /// Check an attribute set against this signature.
    pub fn validate(&self, attrs: &OpAttrs) -> BridgeResult<()> {
        if attrs.plasma_store_socket_name.is_empty() {
            return Err(BridgeError::InvalidArgument(format!(
                "{}: attr plasma_store_socket_name must not be empty",
                self.name
            )));
        }
        match self.name {
            TENSOR_TO_PLASMA => {
                if attrs.dtype.is_some() {
                    return Err(unknown_attr(self.name, "dtype"));
                }
                check_supported(&attrs.dtypes)?;
                if let Some(first) = attrs.dtypes.first() {
                    if let Some(other) = attrs.dtypes.iter().find(|d| *d != first) {
                        return Err(TypeError::DTypeMismatch {
                            expected: *first,
                            actual: *other,
                        }
                        .into());
                    }
                }
            }
            PLASMA_TO_TENSOR => {
                if !attrs.dtypes.is_empty() {
                    return Err(unknown_attr(self.name, "dtypes"));
                }
                if let Some(dtype) = attrs.dtype {
                    check_supported(&[dtype])?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn unknown_attr(op: &str, name: &str) -> BridgeError {
    BridgeError::InvalidArgument(format!("{op} has no attr named {name}"))
}

fn check_supported(dtypes: &[DType]) -> BridgeResult<()> {
    match dtypes.iter().find(|d| !d.is_supported()) {
        Some(d) => Err(TypeError::UnsupportedDType(*d).into()),
        None => Ok(()),
    }
}

impl fmt::Display for OpDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "REGISTER_OP(\"{}\")", self.name)?;
        for input in &self.inputs {
            writeln!(f, "    .Input(\"{}: {}\")", input.name, input.type_spec)?;
        }
        for output in &self.outputs {
            writeln!(f, "    .Output(\"{}: {}\")", output.name, output.type_spec)?;
        }
        for a in &self.attrs {
            match a.default {
                Some(d) => writeln!(f, "    .Attr(\"{}: {} = {}\")", a.name, a.type_spec, d)?,
                None => writeln!(f, "    .Attr(\"{}: {}\")", a.name, a.type_spec)?,
            }
        }
        Ok(())
    }
}
