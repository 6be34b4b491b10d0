//! Dynamic libraries and calls into their exported C functions.
//!
//! Every call goes through one of two trampoline shapes,
//! `fn(u64 x6, f64 x8) -> u64` and `fn(u64 x6, f64 x8) -> f64`. On the
//! supported targets integer-class and floating arguments are assigned to
//! their register files independently and in order, so a function with at
//! most six integer-class and eight floating parameters receives exactly the
//! values it declares; the unused registers are ignored.

#![allow(unsafe_code)]

use std::ffi::CString;
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, instrument};

use crate::core::types::{BoundValue, Scalar, TypeTag};
use crate::error::RunError;

pub const MAX_INTEGER_ARGS: usize = 6;
pub const MAX_FLOAT_ARGS: usize = 8;

/// A loaded library that can resolve and call its exported functions.
pub trait LoadedLibrary {
    fn path(&self) -> &Path;

    fn has_symbol(&self, symbol: &str) -> bool;

    /// Address of `symbol`, for passing as a function-pointer argument.
    fn symbol_address(&self, symbol: &str) -> Result<u64, RunError>;

    /// Call `symbol` with arguments already bound in calling order.
    ///
    /// Returns `None` for `void` functions.
    fn call(
        &self,
        symbol: &str,
        return_type: Option<TypeTag>,
        arguments: &[BoundValue],
    ) -> Result<Option<Scalar>, RunError>;
}

/// Opens libraries by path.
pub trait LibraryLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn LoadedLibrary>, RunError>;
}

/// [`LibraryLoader`] backed by the platform dynamic linker.
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicLibraryLoader;

impl LibraryLoader for DynamicLibraryLoader {
    #[instrument(skip_all, fields(path = %path.display()))]
    fn load(&self, path: &Path) -> Result<Box<dyn LoadedLibrary>, RunError> {
        // A bare file name would send the dynamic linker searching its path.
        let absolute = std::path::absolute(path).map_err(|e| {
            RunError::Runner(format!("couldn't resolve library path {}: {e}", path.display()))
        })?;
        let library = unsafe { Library::new(&absolute) }.map_err(|e| {
            RunError::Runner(format!("couldn't load library {}: {e}", absolute.display()))
        })?;
        debug!("library loaded");
        Ok(Box::new(DynamicLibrary {
            path: absolute,
            library,
        }))
    }
}

/// A library opened through `libloading`.
pub struct DynamicLibrary {
    path: PathBuf,
    library: Library,
}

impl DynamicLibrary {
    fn missing_symbol(&self, symbol: &str) -> RunError {
        RunError::Runner(format!(
            "missing symbol '{symbol}' in {}; was it exported with C linkage and default visibility?",
            self.path.display()
        ))
    }
}

impl LoadedLibrary for DynamicLibrary {
    fn path(&self) -> &Path {
        &self.path
    }

    fn has_symbol(&self, symbol: &str) -> bool {
        self.symbol_address(symbol).is_ok()
    }

    fn symbol_address(&self, symbol: &str) -> Result<u64, RunError> {
        let address = unsafe { self.library.get::<*const std::ffi::c_void>(symbol.as_bytes()) }
            .map(|sym| *sym as u64)
            .map_err(|_| self.missing_symbol(symbol))?;
        if address == 0 {
            return Err(self.missing_symbol(symbol));
        }
        Ok(address)
    }

    #[instrument(skip_all, fields(symbol = %symbol))]
    fn call(
        &self,
        symbol: &str,
        return_type: Option<TypeTag>,
        arguments: &[BoundValue],
    ) -> Result<Option<Scalar>, RunError> {
        let address = self.symbol_address(symbol)?;
        let registers = Registers::arrange(arguments)?;
        let outcome = unsafe { trampoline::call(address, &registers, return_type)? };
        debug!(?outcome, "native call returned");
        if let (Some(TypeTag::CharPtr), RawReturn::Integer(address)) = (return_type, outcome) {
            return Ok(unsafe { read_c_string(address) });
        }
        Ok(decode_return(outcome, return_type))
    }
}

/// Argument values laid out by register class.
///
/// Owns the C strings whose addresses sit in `integer`, so they outlive the call.
#[derive(Debug, Default)]
pub struct Registers {
    pub integer: [u64; MAX_INTEGER_ARGS],
    pub float: [f64; MAX_FLOAT_ARGS],
    integer_used: usize,
    float_used: usize,
    strings: Vec<CString>,
}

impl Registers {
    pub fn arrange(arguments: &[BoundValue]) -> Result<Registers, RunError> {
        let mut registers = Registers::default();
        for argument in arguments {
            match argument {
                BoundValue::Signed { value, .. } => registers.push_integer(*value as u64)?,
                BoundValue::Unsigned { value, .. } => registers.push_integer(*value)?,
                BoundValue::Address(address) => registers.push_integer(*address)?,
                BoundValue::Text(text) => {
                    let c_text = CString::new(text.as_str()).map_err(|_| {
                        RunError::Runner("string argument contains NUL".to_string())
                    })?;
                    let address = c_text.as_ptr() as u64;
                    registers.strings.push(c_text);
                    registers.push_integer(address)?;
                }
                BoundValue::Function(symbol) => {
                    return Err(RunError::Runner(format!(
                        "function pointer '{symbol}' was not resolved before the call"
                    )));
                }
                // The callee reads only the low 32 bits of the vector register.
                BoundValue::Float(value) => {
                    registers.push_float(f64::from_bits(u64::from(value.to_bits())))?;
                }
                BoundValue::Double(value) => registers.push_float(*value)?,
            }
        }
        Ok(registers)
    }

    pub fn integer_used(&self) -> usize {
        self.integer_used
    }

    pub fn float_used(&self) -> usize {
        self.float_used
    }

    fn push_integer(&mut self, bits: u64) -> Result<(), RunError> {
        if self.integer_used == MAX_INTEGER_ARGS {
            return Err(RunError::Runner(format!(
                "native calls support at most {MAX_INTEGER_ARGS} integer or pointer parameters"
            )));
        }
        self.integer[self.integer_used] = bits;
        self.integer_used += 1;
        Ok(())
    }

    fn push_float(&mut self, value: f64) -> Result<(), RunError> {
        if self.float_used == MAX_FLOAT_ARGS {
            return Err(RunError::Runner(format!(
                "native calls support at most {MAX_FLOAT_ARGS} floating-point parameters"
            )));
        }
        self.float[self.float_used] = value;
        self.float_used += 1;
        Ok(())
    }
}

/// Copy the NUL-terminated string a call returned; a null pointer is no value.
///
/// # Safety
/// A non-zero `address` must point at a NUL-terminated string.
unsafe fn read_c_string(address: u64) -> Option<Scalar> {
    if address == 0 {
        return None;
    }
    let text = unsafe { std::ffi::CStr::from_ptr(address as *const std::ffi::c_char) };
    Some(Scalar::Str(text.to_string_lossy().into_owned()))
}

/// Raw register contents after a call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawReturn {
    Integer(u64),
    Float(f64),
}

/// Interpret the raw return register according to the declared return type.
pub fn decode_return(raw: RawReturn, return_type: Option<TypeTag>) -> Option<Scalar> {
    let tag = return_type?;
    match (tag, raw) {
        (TypeTag::Float, RawReturn::Float(value)) => {
            Some(Scalar::Float(f64::from(f32::from_bits(value.to_bits() as u32))))
        }
        (TypeTag::Double, RawReturn::Float(value)) => Some(Scalar::Float(value)),
        (TypeTag::Bool, RawReturn::Integer(bits)) => Some(Scalar::Bool(bits & 0xff != 0)),
        (
            TypeTag::CharPtr | TypeTag::VoidPtr | TypeTag::FunctionPointer,
            RawReturn::Integer(address),
        ) => Some(Scalar::UInt(address)),
        (_, RawReturn::Integer(bits)) => {
            let (width, signed) = tag.integer_layout()?;
            let shift = 64 - width;
            if signed {
                Some(Scalar::Int(((bits << shift) as i64) >> shift))
            } else {
                Some(Scalar::UInt((bits << shift) >> shift))
            }
        }
        (_, RawReturn::Float(_)) => None,
    }
}

#[cfg(all(unix, any(target_arch = "x86_64", target_arch = "aarch64")))]
mod trampoline {
    use super::{RawReturn, Registers};
    use crate::core::types::{RegisterClass, TypeTag};
    use crate::error::RunError;

    type IntegerReturning = unsafe extern "C" fn(
        u64,
        u64,
        u64,
        u64,
        u64,
        u64,
        f64,
        f64,
        f64,
        f64,
        f64,
        f64,
        f64,
        f64,
    ) -> u64;
    type FloatReturning = unsafe extern "C" fn(
        u64,
        u64,
        u64,
        u64,
        u64,
        u64,
        f64,
        f64,
        f64,
        f64,
        f64,
        f64,
        f64,
        f64,
    ) -> f64;

    /// Call the function at `address`.
    ///
    /// # Safety
    /// `address` must be a C function whose parameters and return type match
    /// the arguments arranged in `registers` and `return_type`.
    pub unsafe fn call(
        address: u64,
        registers: &Registers,
        return_type: Option<TypeTag>,
    ) -> Result<RawReturn, RunError> {
        let i = &registers.integer;
        let f = &registers.float;
        let returns_float = return_type.map(TypeTag::register_class) == Some(RegisterClass::Float);
        let outcome = if returns_float {
            let function: FloatReturning = unsafe { std::mem::transmute(address as usize) };
            RawReturn::Float(unsafe {
                function(
                    i[0],
                    i[1],
                    i[2],
                    i[3],
                    i[4],
                    i[5],
                    f[0],
                    f[1],
                    f[2],
                    f[3],
                    f[4],
                    f[5],
                    f[6],
                    f[7],
                )
            })
        } else {
            let function: IntegerReturning = unsafe { std::mem::transmute(address as usize) };
            RawReturn::Integer(unsafe {
                function(
                    i[0],
                    i[1],
                    i[2],
                    i[3],
                    i[4],
                    i[5],
                    f[0],
                    f[1],
                    f[2],
                    f[3],
                    f[4],
                    f[5],
                    f[6],
                    f[7],
                )
            })
        };
        Ok(outcome)
    }
}

#[cfg(not(all(unix, any(target_arch = "x86_64", target_arch = "aarch64"))))]
mod trampoline {
    use super::{RawReturn, Registers};
    use crate::core::types::TypeTag;
    use crate::error::RunError;

    pub unsafe fn call(
        _address: u64,
        _registers: &Registers,
        _return_type: Option<TypeTag>,
    ) -> Result<RawReturn, RunError> {
        Err(RunError::Runner(format!(
            "native calls are not supported on {}",
            std::env::consts::ARCH
        )))
    }
}
