//! Argument binding: match named arguments to a signature's calling order.

use std::collections::BTreeMap;

use crate::core::signature::FunctionSignature;
use crate::core::types::{BoundValue, Scalar};
use crate::error::RunError;

/// Named arguments as supplied by the caller.
pub type Arguments = BTreeMap<String, Scalar>;

/// Validate `arguments` against `signature` and return them in parameter order.
///
/// Fails on the first parameter without an argument, the first value that does
/// not convert to its parameter's type, or the first argument no parameter uses.
pub fn bind(
    arguments: &Arguments,
    signature: &FunctionSignature,
) -> Result<Vec<BoundValue>, RunError> {
    let mut bound = Vec::with_capacity(signature.parameters.len());
    for parameter in &signature.parameters {
        let supplied = arguments
            .get(&parameter.name)
            .ok_or_else(|| RunError::MissingArgument {
                name: parameter.name.clone(),
            })?;
        let value = parameter
            .ty
            .coerce(supplied)
            .ok_or_else(|| RunError::IncorrectArgumentType {
                parameter: parameter.name.clone(),
                expected: parameter.ty.c_name().to_string(),
                supplied: supplied.to_string(),
            })?;
        bound.push(value);
    }

    if let Some(unused) = arguments
        .keys()
        .find(|name| signature.parameter(name).is_none())
    {
        return Err(RunError::UnusedArgument {
            name: unused.clone(),
        });
    }
    Ok(bound)
}

/// Zip bound values back with their parameter names.
pub fn unbind(bound: &[BoundValue], signature: &FunctionSignature) -> Arguments {
    signature
        .parameters
        .iter()
        .zip(bound)
        .map(|(parameter, value)| (parameter.name.clone(), value.to_scalar()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::signature::Parameter;
    use crate::core::types::TypeTag;

    fn signature() -> FunctionSignature {
        FunctionSignature::new(
            "f",
            Some(TypeTag::Int),
            vec![
                Parameter::new("b", TypeTag::Float),
                Parameter::new("a", TypeTag::Int),
                Parameter::new("c", TypeTag::CharPtr),
            ],
        )
    }

    fn args(pairs: &[(&str, Scalar)]) -> Arguments {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn binds_in_signature_order() {
        let arguments = args(&[
            ("a", Scalar::Int(2)),
            ("b", Scalar::Float(1.5)),
            ("c", Scalar::from("x")),
        ]);
        let bound = bind(&arguments, &signature()).expect("bind");
        let tags: Vec<TypeTag> = bound.iter().map(BoundValue::tag).collect();
        assert_eq!(tags, vec![TypeTag::Float, TypeTag::Int, TypeTag::CharPtr]);
        assert_eq!(unbind(&bound, &signature()), arguments);
    }

    #[test]
    fn missing_argument_names_the_parameter() {
        let arguments = args(&[("b", Scalar::Float(1.0)), ("c", Scalar::from("x"))]);
        let err = bind(&arguments, &signature()).unwrap_err();
        assert_eq!(
            err,
            RunError::MissingArgument {
                name: "a".to_string()
            }
        );
    }

    #[test]
    fn unused_argument_names_the_extra_key() {
        let arguments = args(&[
            ("a", Scalar::Int(2)),
            ("b", Scalar::Float(1.5)),
            ("c", Scalar::from("x")),
            ("zz", Scalar::Int(0)),
        ]);
        let err = bind(&arguments, &signature()).unwrap_err();
        assert_eq!(
            err,
            RunError::UnusedArgument {
                name: "zz".to_string()
            }
        );
    }

    #[test]
    fn incorrect_type_reports_parameter_and_value() {
        let arguments = args(&[
            ("a", Scalar::from("aoeu")),
            ("b", Scalar::Float(1.5)),
            ("c", Scalar::from("x")),
        ]);
        let err = bind(&arguments, &signature()).unwrap_err();
        assert_eq!(
            err,
            RunError::IncorrectArgumentType {
                parameter: "a".to_string(),
                expected: "int".to_string(),
                supplied: "aoeu".to_string(),
            }
        );
    }

    #[test]
    fn empty_signature_binds_empty_arguments() {
        let sig = FunctionSignature::new("four", Some(TypeTag::Int), Vec::new());
        assert!(bind(&Arguments::new(), &sig).expect("bind").is_empty());
    }

    /// Sweeps every parameter of a wider signature: dropping any one parameter's
    /// argument must name exactly that parameter.
    #[test]
    fn every_dropped_parameter_is_reported() {
        let sig = FunctionSignature::new(
            "wide",
            None,
            (0..6)
                .map(|i| Parameter::new(format!("p{i}"), TypeTag::Long))
                .collect(),
        );
        let full: Arguments = (0..6)
            .map(|i| (format!("p{i}"), Scalar::Int(i)))
            .collect();
        assert_eq!(unbind(&bind(&full, &sig).expect("bind"), &sig), full);
        for dropped in 0..6 {
            let mut partial = full.clone();
            partial.remove(&format!("p{dropped}"));
            assert_eq!(
                bind(&partial, &sig).unwrap_err(),
                RunError::MissingArgument {
                    name: format!("p{dropped}")
                }
            );
        }
    }
}
