//! FFI Type System
//!
//! Parameter and return kinds, call signatures, decoded values and borrowed
//! outgoing arguments.

use std::ffi::{c_void, CStr, CString};
use std::fmt;
use std::marker::PhantomData;

/// Register class an argument travels in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterClass {
    Integer,
    Float,
}

/// Kind of one declared parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// 8-bit integer, 0 or 1
    Bool,
    /// Opaque machine address
    Pointer,
    /// NUL-terminated C string (`const char*`)
    Text,
    /// Borrowed contiguous buffer, passed as its base address
    Buffer,
    /// Aggregate passed by value; declarable but never supported
    Struct { size: usize, align: usize },
}

impl ParamKind {
    /// Size in bytes of the value as the callee sees it
    pub fn size(&self) -> usize {
        match self {
            ParamKind::I8 | ParamKind::U8 | ParamKind::Bool => 1,
            ParamKind::I16 | ParamKind::U16 => 2,
            ParamKind::I32 | ParamKind::U32 | ParamKind::F32 => 4,
            ParamKind::I64 | ParamKind::U64 | ParamKind::F64 => 8,
            ParamKind::Pointer | ParamKind::Text | ParamKind::Buffer => {
                std::mem::size_of::<usize>()
            }
            ParamKind::Struct { size, .. } => *size,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ParamKind::I8
                | ParamKind::I16
                | ParamKind::I32
                | ParamKind::I64
                | ParamKind::U8
                | ParamKind::U16
                | ParamKind::U32
                | ParamKind::U64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ParamKind::F32 | ParamKind::F64)
    }

    /// Register class, or `None` for aggregates
    pub fn class(&self) -> Option<RegisterClass> {
        match self {
            ParamKind::F32 | ParamKind::F64 => Some(RegisterClass::Float),
            ParamKind::Struct { .. } => None,
            _ => Some(RegisterClass::Integer),
        }
    }

    /// Parse a kind name, accepting C spellings (`int`, `double`, `const char*`)
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_lowercase().as_str() {
            "i8" | "int8" | "int8_t" | "char" | "signed char" => Some(ParamKind::I8),
            "i16" | "int16" | "int16_t" | "short" => Some(ParamKind::I16),
            "i32" | "int32" | "int32_t" | "int" => Some(ParamKind::I32),
            "i64" | "int64" | "int64_t" | "long" | "long long" | "ssize_t" => {
                Some(ParamKind::I64)
            }
            "u8" | "uint8" | "uint8_t" | "byte" | "unsigned char" => Some(ParamKind::U8),
            "u16" | "uint16" | "uint16_t" | "unsigned short" => Some(ParamKind::U16),
            "u32" | "uint32" | "uint32_t" | "unsigned" | "unsigned int" => Some(ParamKind::U32),
            "u64" | "uint64" | "uint64_t" | "ulong" | "unsigned long" | "size_t" => {
                Some(ParamKind::U64)
            }
            "f32" | "float" => Some(ParamKind::F32),
            "f64" | "double" => Some(ParamKind::F64),
            "bool" | "_bool" => Some(ParamKind::Bool),
            "ptr" | "pointer" | "void*" | "void *" | "const void*" | "const void *" => {
                Some(ParamKind::Pointer)
            }
            "text" | "cstr" | "string" | "char*" | "char *" | "const char*" | "const char *" => {
                Some(ParamKind::Text)
            }
            "buffer" | "bytes" => Some(ParamKind::Buffer),
            _ => None,
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::I8 => write!(f, "i8"),
            ParamKind::I16 => write!(f, "i16"),
            ParamKind::I32 => write!(f, "i32"),
            ParamKind::I64 => write!(f, "i64"),
            ParamKind::U8 => write!(f, "u8"),
            ParamKind::U16 => write!(f, "u16"),
            ParamKind::U32 => write!(f, "u32"),
            ParamKind::U64 => write!(f, "u64"),
            ParamKind::F32 => write!(f, "f32"),
            ParamKind::F64 => write!(f, "f64"),
            ParamKind::Bool => write!(f, "bool"),
            ParamKind::Pointer => write!(f, "ptr"),
            ParamKind::Text => write!(f, "text"),
            ParamKind::Buffer => write!(f, "buffer"),
            ParamKind::Struct { size, align } => write!(f, "struct({size}, align {align})"),
        }
    }
}

/// Kind of a declared return value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnKind {
    Void,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    Pointer,
    /// Returned `char*`, copied into an owned string
    Text,
    Struct { size: usize, align: usize },
}

impl ReturnKind {
    pub fn is_float(&self) -> bool {
        matches!(self, ReturnKind::F32 | ReturnKind::F64)
    }

    /// Parse a return kind; `void` plus every spelling [`ParamKind::parse`] takes
    /// except buffers
    pub fn parse(s: &str) -> Option<Self> {
        if s.trim().eq_ignore_ascii_case("void") {
            return Some(ReturnKind::Void);
        }
        ParamKind::parse(s).and_then(ReturnKind::from_param)
    }

    /// The return kind with the same representation, if one exists
    pub fn from_param(kind: ParamKind) -> Option<Self> {
        Some(match kind {
            ParamKind::I8 => ReturnKind::I8,
            ParamKind::I16 => ReturnKind::I16,
            ParamKind::I32 => ReturnKind::I32,
            ParamKind::I64 => ReturnKind::I64,
            ParamKind::U8 => ReturnKind::U8,
            ParamKind::U16 => ReturnKind::U16,
            ParamKind::U32 => ReturnKind::U32,
            ParamKind::U64 => ReturnKind::U64,
            ParamKind::F32 => ReturnKind::F32,
            ParamKind::F64 => ReturnKind::F64,
            ParamKind::Bool => ReturnKind::Bool,
            ParamKind::Pointer => ReturnKind::Pointer,
            ParamKind::Text => ReturnKind::Text,
            ParamKind::Struct { size, align } => ReturnKind::Struct { size, align },
            ParamKind::Buffer => return None,
        })
    }
}

impl fmt::Display for ReturnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnKind::Void => write!(f, "void"),
            ReturnKind::I8 => write!(f, "i8"),
            ReturnKind::I16 => write!(f, "i16"),
            ReturnKind::I32 => write!(f, "i32"),
            ReturnKind::I64 => write!(f, "i64"),
            ReturnKind::U8 => write!(f, "u8"),
            ReturnKind::U16 => write!(f, "u16"),
            ReturnKind::U32 => write!(f, "u32"),
            ReturnKind::U64 => write!(f, "u64"),
            ReturnKind::F32 => write!(f, "f32"),
            ReturnKind::F64 => write!(f, "f64"),
            ReturnKind::Bool => write!(f, "bool"),
            ReturnKind::Pointer => write!(f, "ptr"),
            ReturnKind::Text => write!(f, "text"),
            ReturnKind::Struct { size, align } => write!(f, "struct({size}, align {align})"),
        }
    }
}

/// Ordered parameter kinds and a return kind.
///
/// A variadic signature lists the fixed parameters followed by the
/// variadic arguments of one concrete call shape; `fixed` marks where the
/// variadic part starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSignature {
    params: Vec<ParamKind>,
    returns: ReturnKind,
    fixed: Option<usize>,
}

impl CallSignature {
    pub fn new(params: Vec<ParamKind>, returns: ReturnKind) -> Self {
        Self {
            params,
            returns,
            fixed: None,
        }
    }

    /// A variadic signature whose first `fixed` parameters are declared
    pub fn variadic(params: Vec<ParamKind>, returns: ReturnKind, fixed: usize) -> Self {
        Self {
            params,
            returns,
            fixed: Some(fixed),
        }
    }

    pub fn params(&self) -> &[ParamKind] {
        &self.params
    }

    pub fn returns(&self) -> ReturnKind {
        self.returns
    }

    pub fn is_variadic(&self) -> bool {
        self.fixed.is_some()
    }

    /// Number of declared (non-variadic) parameters
    pub fn fixed_count(&self) -> usize {
        self.fixed.unwrap_or(self.params.len())
    }

    /// Whether parameter `index` falls in the variadic part
    pub fn is_variadic_arg(&self, index: usize) -> bool {
        self.fixed.is_some_and(|fixed| index >= fixed)
    }

    /// Parse a C-style prototype: `"int abs(int)"`, `"double pow(double, double)"`.
    ///
    /// Parameter names are optional. Kinds listed after `...` become the
    /// variadic arguments of this call shape:
    /// `"int printf(const char*, ..., int, double)"`.
    pub fn parse(prototype: &str) -> Option<(String, Self)> {
        let prototype = prototype.trim().trim_end_matches(';');
        let open = prototype.find('(')?;
        let close = prototype.rfind(')')?;
        if close < open {
            return None;
        }

        let head = prototype[..open].trim();
        let name_start = head
            .rfind(|c: char| c.is_whitespace() || c == '*')
            .map(|i| i + 1)?;
        let name = head[name_start..].trim();
        let returns = ReturnKind::parse(&head[..name_start])?;
        if name.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        let mut fixed = None;
        let list = prototype[open + 1..close].trim();
        if !list.is_empty() && list != "void" {
            for param in list.split(',') {
                let param = param.trim();
                if param == "..." {
                    if fixed.is_some() {
                        return None;
                    }
                    fixed = Some(params.len());
                    continue;
                }
                params.push(parse_param(param)?);
            }
        }

        Some((
            name.to_string(),
            Self {
                params,
                returns,
                fixed,
            },
        ))
    }
}

/// A parameter with or without a trailing name (`int n`, `const char *s`)
fn parse_param(param: &str) -> Option<ParamKind> {
    if let Some(kind) = ParamKind::parse(param) {
        return Some(kind);
    }
    let split = param.rfind(|c: char| c.is_whitespace() || c == '*')?;
    let (ty, _name) = param.split_at(split + 1);
    ParamKind::parse(ty)
}

impl fmt::Display for CallSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if self.fixed == Some(i) {
                write!(f, "..., ")?;
            }
            write!(f, "{}", param)?;
        }
        if self.fixed == Some(self.params.len()) {
            if !self.params.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "...")?;
        }
        write!(f, ") -> {}", self.returns)
    }
}

/// Raw result registers after a call
#[derive(Debug, Clone, Copy, Default)]
pub struct RawReturn {
    /// First integer result register (rax / x0)
    pub int: u64,
    /// First float result register (xmm0 / d0)
    pub float: u64,
}

/// A decoded managed value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Pointer(usize),
    /// Owned copy of a C string; `None` for NULL
    Text(Option<CString>),
}

impl Value {
    /// Decode the result registers of a call returning `kind`.
    ///
    /// # Safety
    ///
    /// For [`ReturnKind::Text`] the integer result must be NULL or point to a
    /// NUL-terminated string.
    pub unsafe fn from_return(kind: ReturnKind, raw: RawReturn) -> Value {
        match kind {
            ReturnKind::Void | ReturnKind::Struct { .. } => Value::Void,
            ReturnKind::I8 => Value::I8(raw.int as i8),
            ReturnKind::I16 => Value::I16(raw.int as i16),
            ReturnKind::I32 => Value::I32(raw.int as i32),
            ReturnKind::I64 => Value::I64(raw.int as i64),
            ReturnKind::U8 => Value::U8(raw.int as u8),
            ReturnKind::U16 => Value::U16(raw.int as u16),
            ReturnKind::U32 => Value::U32(raw.int as u32),
            ReturnKind::U64 => Value::U64(raw.int),
            ReturnKind::F32 => Value::F32(f32::from_bits(raw.float as u32)),
            ReturnKind::F64 => Value::F64(f64::from_bits(raw.float)),
            ReturnKind::Bool => Value::Bool(raw.int as u8 != 0),
            ReturnKind::Pointer => Value::Pointer(raw.int as usize),
            ReturnKind::Text => Value::Text(copy_c_string(raw.int as usize as *const _)),
        }
    }

    /// Decode one argument word received by a callback.
    ///
    /// # Safety
    ///
    /// For [`ParamKind::Text`] the word must be NULL or point to a
    /// NUL-terminated string.
    pub(crate) unsafe fn from_word(kind: ParamKind, word: u64) -> Value {
        match kind {
            ParamKind::I8 => Value::I8(word as i8),
            ParamKind::I16 => Value::I16(word as i16),
            ParamKind::I32 => Value::I32(word as i32),
            ParamKind::I64 => Value::I64(word as i64),
            ParamKind::U8 => Value::U8(word as u8),
            ParamKind::U16 => Value::U16(word as u16),
            ParamKind::U32 => Value::U32(word as u32),
            ParamKind::U64 => Value::U64(word),
            ParamKind::F32 => Value::F32(f32::from_bits(word as u32)),
            ParamKind::F64 => Value::F64(f64::from_bits(word)),
            ParamKind::Bool => Value::Bool(word as u8 != 0),
            ParamKind::Pointer | ParamKind::Buffer => Value::Pointer(word as usize),
            ParamKind::Text => Value::Text(copy_c_string(word as usize as *const _)),
            ParamKind::Struct { .. } => Value::Void,
        }
    }

    /// Encode as a result word, if the value has the representation of `kind`
    pub(crate) fn to_word(&self, kind: ReturnKind) -> Option<u64> {
        let word = match (kind, self) {
            (ReturnKind::Void, Value::Void) => 0,
            (ReturnKind::I8, Value::I8(v)) => *v as i64 as u64,
            (ReturnKind::I16, Value::I16(v)) => *v as i64 as u64,
            (ReturnKind::I32, Value::I32(v)) => *v as i64 as u64,
            (ReturnKind::I64, Value::I64(v)) => *v as u64,
            (ReturnKind::U8, Value::U8(v)) => *v as u64,
            (ReturnKind::U16, Value::U16(v)) => *v as u64,
            (ReturnKind::U32, Value::U32(v)) => *v as u64,
            (ReturnKind::U64, Value::U64(v)) => *v,
            (ReturnKind::F32, Value::F32(v)) => v.to_bits() as u64,
            (ReturnKind::F64, Value::F64(v)) => v.to_bits(),
            (ReturnKind::Bool, Value::Bool(v)) => *v as u64,
            (ReturnKind::Pointer, Value::Pointer(v)) => *v as u64,
            _ => return None,
        };
        Some(word)
    }

    /// The return kind this value decodes from
    pub fn kind(&self) -> ReturnKind {
        match self {
            Value::Void => ReturnKind::Void,
            Value::I8(_) => ReturnKind::I8,
            Value::I16(_) => ReturnKind::I16,
            Value::I32(_) => ReturnKind::I32,
            Value::I64(_) => ReturnKind::I64,
            Value::U8(_) => ReturnKind::U8,
            Value::U16(_) => ReturnKind::U16,
            Value::U32(_) => ReturnKind::U32,
            Value::U64(_) => ReturnKind::U64,
            Value::F32(_) => ReturnKind::F32,
            Value::F64(_) => ReturnKind::F64,
            Value::Bool(_) => ReturnKind::Bool,
            Value::Pointer(_) => ReturnKind::Pointer,
            Value::Text(_) => ReturnKind::Text,
        }
    }

    /// Integer payload widened to `i64` (booleans as 0/1)
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::I8(v) => Some(v as i64),
            Value::I16(v) => Some(v as i64),
            Value::I32(v) => Some(v as i64),
            Value::I64(v) => Some(v),
            Value::U8(v) => Some(v as i64),
            Value::U16(v) => Some(v as i64),
            Value::U32(v) => Some(v as i64),
            Value::U64(v) => Some(v as i64),
            Value::Bool(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v as f64),
            Value::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<usize> {
        match *self {
            Value::Pointer(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&CStr> {
        match self {
            Value::Text(Some(s)) => Some(s.as_c_str()),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::I8(v) => write!(f, "{v}"),
            Value::I16(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::U8(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Pointer(p) => write!(f, "{p:#x}"),
            Value::Text(Some(s)) => write!(f, "{:?}", s.to_string_lossy()),
            Value::Text(None) => write!(f, "NULL"),
        }
    }
}

unsafe fn copy_c_string(ptr: *const std::ffi::c_char) -> Option<CString> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_owned())
    }
}

/// Borrowed view of a contiguous buffer, valid for `'a`
#[derive(Debug, Clone, Copy)]
pub struct RawView<'a> {
    ptr: *const c_void,
    len: usize,
    _owner: PhantomData<&'a ()>,
}

impl<'a> RawView<'a> {
    pub fn from_slice<T>(slice: &'a [T]) -> Self {
        Self {
            ptr: slice.as_ptr().cast(),
            len: std::mem::size_of_val(slice),
            _owner: PhantomData,
        }
    }

    /// A view the callee may write through
    pub fn from_mut_slice<T>(slice: &'a mut [T]) -> Self {
        Self {
            ptr: slice.as_mut_ptr().cast_const().cast(),
            len: std::mem::size_of_val(slice),
            _owner: PhantomData,
        }
    }

    pub fn as_ptr(&self) -> *const c_void {
        self.ptr
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// One outgoing argument, borrowed for the duration of a call
#[derive(Debug, Clone, Copy)]
pub enum Arg<'a> {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Pointer(*const c_void),
    /// Text that may lack a terminating NUL; copied for the call if so
    Text(&'a [u8]),
    /// Text that is already NUL-terminated; passed through
    CText(&'a CStr),
    Buffer(RawView<'a>),
}

impl<'a> Arg<'a> {
    pub fn text(s: &'a str) -> Self {
        Arg::Text(s.as_bytes())
    }

    pub fn buffer<T>(slice: &'a [T]) -> Self {
        Arg::Buffer(RawView::from_slice(slice))
    }

    pub fn buffer_mut<T>(slice: &'a mut [T]) -> Self {
        Arg::Buffer(RawView::from_mut_slice(slice))
    }

    pub fn kind(&self) -> ParamKind {
        match self {
            Arg::I8(_) => ParamKind::I8,
            Arg::I16(_) => ParamKind::I16,
            Arg::I32(_) => ParamKind::I32,
            Arg::I64(_) => ParamKind::I64,
            Arg::U8(_) => ParamKind::U8,
            Arg::U16(_) => ParamKind::U16,
            Arg::U32(_) => ParamKind::U32,
            Arg::U64(_) => ParamKind::U64,
            Arg::F32(_) => ParamKind::F32,
            Arg::F64(_) => ParamKind::F64,
            Arg::Bool(_) => ParamKind::Bool,
            Arg::Pointer(_) => ParamKind::Pointer,
            Arg::Text(_) | Arg::CText(_) => ParamKind::Text,
            Arg::Buffer(_) => ParamKind::Buffer,
        }
    }

    /// Register image of a scalar argument: integers sign or zero extended
    /// to 64 bits, floats as their IEEE bits. `Text` views that need a
    /// terminator are handled by the call engine before this point.
    pub(crate) fn word(&self) -> u64 {
        match *self {
            Arg::I8(v) => v as i64 as u64,
            Arg::I16(v) => v as i64 as u64,
            Arg::I32(v) => v as i64 as u64,
            Arg::I64(v) => v as u64,
            Arg::U8(v) => v as u64,
            Arg::U16(v) => v as u64,
            Arg::U32(v) => v as u64,
            Arg::U64(v) => v,
            Arg::F32(v) => v.to_bits() as u64,
            Arg::F64(v) => v.to_bits(),
            Arg::Bool(v) => v as u64,
            Arg::Pointer(p) => p as usize as u64,
            Arg::Text(bytes) => bytes.as_ptr() as usize as u64,
            Arg::CText(s) => s.as_ptr() as usize as u64,
            Arg::Buffer(view) => view.as_ptr() as usize as u64,
        }
    }
}

macro_rules! impl_arg_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Arg<'_> {
                fn from(v: $ty) -> Self {
                    Arg::$variant(v)
                }
            }
        )*
    };
}

impl_arg_from! {
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    f32 => F32, f64 => F64, bool => Bool,
}

impl<T> From<*const T> for Arg<'_> {
    fn from(p: *const T) -> Self {
        Arg::Pointer(p.cast())
    }
}

impl<T> From<*mut T> for Arg<'_> {
    fn from(p: *mut T) -> Self {
        Arg::Pointer(p.cast_const().cast())
    }
}

impl<'a> From<&'a str> for Arg<'a> {
    fn from(s: &'a str) -> Self {
        Arg::text(s)
    }
}

impl<'a> From<&'a CStr> for Arg<'a> {
    fn from(s: &'a CStr) -> Self {
        Arg::CText(s)
    }
}

/// Owned argument parsed from text, as the command-line tool receives it
#[derive(Debug, Clone, PartialEq)]
pub enum OwnedArg {
    Scalar(ParamKind, u64),
    Text(CString),
}

impl OwnedArg {
    /// Parse `kind:value`, e.g. `i32:-7`, `f64:2.5`, `text:hello`, `ptr:0x1000`
    pub fn parse(spec: &str) -> Option<Self> {
        let (kind, value) = spec.split_once(':')?;
        let kind = ParamKind::parse(kind)?;
        let scalar = |word: u64| Some(OwnedArg::Scalar(kind, word));
        match kind {
            ParamKind::I8 => scalar(value.parse::<i8>().ok()? as i64 as u64),
            ParamKind::I16 => scalar(value.parse::<i16>().ok()? as i64 as u64),
            ParamKind::I32 => scalar(value.parse::<i32>().ok()? as i64 as u64),
            ParamKind::I64 => scalar(value.parse::<i64>().ok()? as u64),
            ParamKind::U8 => scalar(value.parse::<u8>().ok()? as u64),
            ParamKind::U16 => scalar(value.parse::<u16>().ok()? as u64),
            ParamKind::U32 => scalar(value.parse::<u32>().ok()? as u64),
            ParamKind::U64 => scalar(value.parse::<u64>().ok()?),
            ParamKind::F32 => scalar(value.parse::<f32>().ok()?.to_bits() as u64),
            ParamKind::F64 => scalar(value.parse::<f64>().ok()?.to_bits()),
            ParamKind::Bool => scalar(value.parse::<bool>().ok()? as u64),
            ParamKind::Pointer => {
                let digits = value.trim_start_matches("0x");
                scalar(u64::from_str_radix(digits, 16).ok()?)
            }
            ParamKind::Text => Some(OwnedArg::Text(CString::new(value).ok()?)),
            ParamKind::Buffer | ParamKind::Struct { .. } => None,
        }
    }

    pub fn kind(&self) -> ParamKind {
        match self {
            OwnedArg::Scalar(kind, _) => *kind,
            OwnedArg::Text(_) => ParamKind::Text,
        }
    }

    pub fn as_arg(&self) -> Arg<'_> {
        match *self {
            OwnedArg::Scalar(kind, word) => match kind {
                ParamKind::I8 => Arg::I8(word as i8),
                ParamKind::I16 => Arg::I16(word as i16),
                ParamKind::I32 => Arg::I32(word as i32),
                ParamKind::I64 => Arg::I64(word as i64),
                ParamKind::U8 => Arg::U8(word as u8),
                ParamKind::U16 => Arg::U16(word as u16),
                ParamKind::U32 => Arg::U32(word as u32),
                ParamKind::F32 => Arg::F32(f32::from_bits(word as u32)),
                ParamKind::F64 => Arg::F64(f64::from_bits(word)),
                ParamKind::Bool => Arg::Bool(word != 0),
                ParamKind::Pointer => Arg::Pointer(word as usize as *const c_void),
                _ => Arg::U64(word),
            },
            OwnedArg::Text(ref s) => Arg::CText(s.as_c_str()),
        }
    }
}
