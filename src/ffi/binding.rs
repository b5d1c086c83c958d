//! Typed Binding Facade
//!
//! Native functions are declared with Rust fn-pointer types over marker
//! types; the signature is derived from the type, validated when binding,
//! and the resulting [`Function`] exposes a `call` method taking exactly the
//! declared argument types.
//!
//! ```ignore
//! use freecall::ffi::{bind, Loader, LibraryHandle, Text};
//!
//! let strlen = unsafe { bind::<fn(Text) -> usize>(Loader::global(), LibraryHandle::PROCESS, "strlen")? };
//! assert_eq!(strlen.call("hello"), 5);
//! ```
//!
//! | Marker | Argument type at `call` | Native view |
//! |--------|-------------------------|-------------|
//! | `i8`..`u64`, `isize`, `usize`, `f32`, `f64`, `bool` | same | same |
//! | `*const T`, `*mut T` | same | pointer |
//! | [`Text`] | `&str` (copied and terminated per call) | `const char*` |
//! | [`CText`] | `&CStr` | `const char*` |
//! | [`Buffer<T>`] | `&[T]` | `const T*` |
//! | [`BufferMut<T>`] | `&mut [T]` | `T*` |
//! | [`ByValue<T>`] | none, always rejected | struct by value |
//!
//! Closures become native callbacks the same way: [`register_callback`]
//! derives the signature from the closure's parameter and return types.

use std::convert::Infallible;
use std::ffi::{CStr, CString};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use super::call::CallStub;
use super::callback::{CallbackAddress, CallbackTable, RawHandler};
use super::error::Result;
use super::loader::{LibraryHandle, Loader, SymbolAddress};
use super::types::{Arg, CallSignature, ParamKind, RawReturn, RawView, ReturnKind};

/// Marker for a text parameter passed as `&str`
pub enum Text {}

/// Marker for a text parameter passed as an already terminated `&CStr`
pub enum CText {}

/// Marker for a read-only buffer parameter passed as `&[T]`
pub struct Buffer<T>(PhantomData<T>);

/// Marker for a writable buffer parameter passed as `&mut [T]`
pub struct BufferMut<T>(PhantomData<T>);

/// Marker for a struct passed or returned by value. No supported calling
/// convention handles these, so binding any shape containing one fails.
pub struct ByValue<T>(PhantomData<T>);

/// A parameter type usable in a bound shape
pub trait FfiParam: 'static {
    const KIND: ParamKind;

    /// What `call` accepts for this parameter
    type Value<'a>;

    fn into_arg<'a>(value: Self::Value<'a>) -> Arg<'a>;
}

/// A return type usable in a bound shape
pub trait FfiReturn: 'static {
    const KIND: ReturnKind;

    /// What `call` produces
    type Output;

    /// # Safety
    ///
    /// `raw` must come from a call whose native return type matches `KIND`.
    unsafe fn from_raw(raw: RawReturn) -> Self::Output;
}

macro_rules! scalar_param {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl FfiParam for $ty {
                const KIND: ParamKind = ParamKind::$kind;
                type Value<'a> = $ty;

                fn into_arg<'a>(value: $ty) -> Arg<'a> {
                    Arg::$kind(value)
                }
            }
        )*
    };
}

scalar_param! {
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    f32 => F32, f64 => F64, bool => Bool,
}

impl FfiParam for isize {
    const KIND: ParamKind = ParamKind::I64;
    type Value<'a> = isize;

    fn into_arg<'a>(value: isize) -> Arg<'a> {
        Arg::I64(value as i64)
    }
}

impl FfiParam for usize {
    const KIND: ParamKind = ParamKind::U64;
    type Value<'a> = usize;

    fn into_arg<'a>(value: usize) -> Arg<'a> {
        Arg::U64(value as u64)
    }
}

impl<T: 'static> FfiParam for *const T {
    const KIND: ParamKind = ParamKind::Pointer;
    type Value<'a> = *const T;

    fn into_arg<'a>(value: *const T) -> Arg<'a> {
        Arg::Pointer(value.cast())
    }
}

impl<T: 'static> FfiParam for *mut T {
    const KIND: ParamKind = ParamKind::Pointer;
    type Value<'a> = *mut T;

    fn into_arg<'a>(value: *mut T) -> Arg<'a> {
        Arg::Pointer(value.cast_const().cast())
    }
}

impl FfiParam for Text {
    const KIND: ParamKind = ParamKind::Text;
    type Value<'a> = &'a str;

    fn into_arg<'a>(value: Self::Value<'a>) -> Arg<'a> {
        Arg::text(value)
    }
}

impl FfiParam for CText {
    const KIND: ParamKind = ParamKind::Text;
    type Value<'a> = &'a CStr;

    fn into_arg<'a>(value: Self::Value<'a>) -> Arg<'a> {
        Arg::CText(value)
    }
}

impl<T: 'static> FfiParam for Buffer<T> {
    const KIND: ParamKind = ParamKind::Buffer;
    type Value<'a> = &'a [T];

    fn into_arg<'a>(value: Self::Value<'a>) -> Arg<'a> {
        Arg::Buffer(RawView::from_slice(value))
    }
}

impl<T: 'static> FfiParam for BufferMut<T> {
    const KIND: ParamKind = ParamKind::Buffer;
    type Value<'a> = &'a mut [T];

    fn into_arg<'a>(value: Self::Value<'a>) -> Arg<'a> {
        Arg::Buffer(RawView::from_mut_slice(value))
    }
}

impl<T: 'static> FfiParam for ByValue<T> {
    const KIND: ParamKind = ParamKind::Struct {
        size: std::mem::size_of::<T>(),
        align: std::mem::align_of::<T>(),
    };
    type Value<'a> = Infallible;

    fn into_arg<'a>(value: Self::Value<'a>) -> Arg<'a> {
        match value {}
    }
}

impl FfiReturn for () {
    const KIND: ReturnKind = ReturnKind::Void;
    type Output = ();

    unsafe fn from_raw(_raw: RawReturn) {}
}

macro_rules! int_return {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl FfiReturn for $ty {
                const KIND: ReturnKind = ReturnKind::$kind;
                type Output = $ty;

                unsafe fn from_raw(raw: RawReturn) -> $ty {
                    raw.int as $ty
                }
            }
        )*
    };
}

int_return! {
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    isize => I64, usize => U64,
}

impl FfiReturn for f32 {
    const KIND: ReturnKind = ReturnKind::F32;
    type Output = f32;

    unsafe fn from_raw(raw: RawReturn) -> f32 {
        f32::from_bits(raw.float as u32)
    }
}

impl FfiReturn for f64 {
    const KIND: ReturnKind = ReturnKind::F64;
    type Output = f64;

    unsafe fn from_raw(raw: RawReturn) -> f64 {
        f64::from_bits(raw.float)
    }
}

impl FfiReturn for bool {
    const KIND: ReturnKind = ReturnKind::Bool;
    type Output = bool;

    unsafe fn from_raw(raw: RawReturn) -> bool {
        raw.int as u8 != 0
    }
}

impl<T: 'static> FfiReturn for *const T {
    const KIND: ReturnKind = ReturnKind::Pointer;
    type Output = *const T;

    unsafe fn from_raw(raw: RawReturn) -> *const T {
        raw.int as usize as *const T
    }
}

impl<T: 'static> FfiReturn for *mut T {
    const KIND: ReturnKind = ReturnKind::Pointer;
    type Output = *mut T;

    unsafe fn from_raw(raw: RawReturn) -> *mut T {
        raw.int as usize as *mut T
    }
}

/// A returned `char*` is copied; `None` for NULL
impl FfiReturn for Text {
    const KIND: ReturnKind = ReturnKind::Text;
    type Output = Option<CString>;

    unsafe fn from_raw(raw: RawReturn) -> Option<CString> {
        let ptr = raw.int as usize as *const std::ffi::c_char;
        (!ptr.is_null()).then(|| CStr::from_ptr(ptr).to_owned())
    }
}

impl<T: 'static> FfiReturn for ByValue<T> {
    const KIND: ReturnKind = ReturnKind::Struct {
        size: std::mem::size_of::<T>(),
        align: std::mem::align_of::<T>(),
    };
    type Output = ();

    unsafe fn from_raw(_raw: RawReturn) {}
}

/// A declared native function shape, e.g. `fn(Text, usize) -> i32`
pub trait Shape: Copy + 'static {
    fn signature() -> CallSignature;
}

/// A native function bound to a typed shape
pub struct Function<F> {
    stub: Arc<CallStub>,
    _shape: PhantomData<F>,
}

impl<F: Shape> Function<F> {
    /// Bind a raw function address.
    ///
    /// # Safety
    ///
    /// `address` must be a function whose native signature matches `F`.
    pub unsafe fn from_address(address: SymbolAddress) -> Result<Self> {
        let stub = CallStub::compile(F::signature(), address)?;
        Ok(Self::from_stub(stub))
    }

    fn from_stub(stub: CallStub) -> Self {
        Self {
            stub: Arc::new(stub),
            _shape: PhantomData,
        }
    }

    pub fn address(&self) -> SymbolAddress {
        self.stub.address()
    }

    /// The compiled stub, for dynamic calls through the same binding
    pub fn stub(&self) -> &CallStub {
        &self.stub
    }
}

impl<F> Clone for Function<F> {
    fn clone(&self) -> Self {
        Self {
            stub: Arc::clone(&self.stub),
            _shape: PhantomData,
        }
    }
}

impl<F> fmt::Debug for Function<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function").field("stub", &self.stub).finish()
    }
}

/// Resolve `name` in `handle` and bind it to the shape `F`.
///
/// The shape is validated before the symbol is looked up, so an unsupported
/// shape fails even for a symbol that does not exist.
///
/// # Safety
///
/// The symbol must be a function whose native signature matches `F`.
pub unsafe fn bind<F: Shape>(
    loader: &Loader,
    handle: LibraryHandle,
    name: &str,
) -> Result<Function<F>> {
    let signature = F::signature();
    let layout = CallStub::plan(&signature)?;
    let address = loader.resolve(handle, name)?;
    Ok(Function::from_stub(CallStub::from_parts(
        signature, layout, address,
    )))
}

macro_rules! impl_shape {
    ($($param:ident : $arg:ident),*) => {
        impl<R: FfiReturn, $($param: FfiParam),*> Shape for fn($($param),*) -> R {
            fn signature() -> CallSignature {
                CallSignature::new(vec![$($param::KIND),*], R::KIND)
            }
        }

        impl<R: FfiReturn, $($param: FfiParam),*> Function<fn($($param),*) -> R> {
            #[allow(clippy::too_many_arguments)]
            pub fn call(&self, $($arg: $param::Value<'_>),*) -> R::Output {
                let args: &[Arg<'_>] = &[$($param::into_arg($arg)),*];
                // SAFETY: binding made the caller vouch that the native
                // function returns R.
                self.stub.invoke_with(args, |raw| unsafe { R::from_raw(raw) })
            }
        }
    };
}

impl_shape!();
impl_shape!(A: a);
impl_shape!(A: a, B: b);
impl_shape!(A: a, B: b, C: c);
impl_shape!(A: a, B: b, C: c, D: d);
impl_shape!(A: a, B: b, C: c, D: d, E: e);
impl_shape!(A: a, B: b, C: c, D: d, E: e, G: g);
impl_shape!(A: a, B: b, C: c, D: d, E: e, G: g, H: h);
impl_shape!(A: a, B: b, C: c, D: d, E: e, G: g, H: h, I: i);
impl_shape!(A: a, B: b, C: c, D: d, E: e, G: g, H: h, I: i, J: j);
impl_shape!(A: a, B: b, C: c, D: d, E: e, G: g, H: h, I: i, J: j, K: k);
impl_shape!(A: a, B: b, C: c, D: d, E: e, G: g, H: h, I: i, J: j, K: k, L: l);
impl_shape!(A: a, B: b, C: c, D: d, E: e, G: g, H: h, I: i, J: j, K: k, L: l, M: m);

/// A parameter type a typed callback can receive
pub trait CallbackParam: 'static {
    const KIND: ParamKind;

    fn from_word(word: u64) -> Self;
}

/// A type a typed callback can return
pub trait CallbackReturn: 'static {
    const KIND: ReturnKind;

    fn into_word(self) -> u64;
}

macro_rules! callback_scalar {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl CallbackParam for $ty {
                const KIND: ParamKind = ParamKind::$kind;

                fn from_word(word: u64) -> $ty {
                    word as $ty
                }
            }

            impl CallbackReturn for $ty {
                const KIND: ReturnKind = ReturnKind::$kind;

                fn into_word(self) -> u64 {
                    self as u64
                }
            }
        )*
    };
}

callback_scalar! {
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    isize => I64, usize => U64,
}

impl CallbackParam for f32 {
    const KIND: ParamKind = ParamKind::F32;

    fn from_word(word: u64) -> f32 {
        f32::from_bits(word as u32)
    }
}

impl CallbackReturn for f32 {
    const KIND: ReturnKind = ReturnKind::F32;

    fn into_word(self) -> u64 {
        self.to_bits() as u64
    }
}

impl CallbackParam for f64 {
    const KIND: ParamKind = ParamKind::F64;

    fn from_word(word: u64) -> f64 {
        f64::from_bits(word)
    }
}

impl CallbackReturn for f64 {
    const KIND: ReturnKind = ReturnKind::F64;

    fn into_word(self) -> u64 {
        self.to_bits()
    }
}

impl CallbackParam for bool {
    const KIND: ParamKind = ParamKind::Bool;

    fn from_word(word: u64) -> bool {
        word as u8 != 0
    }
}

impl CallbackReturn for bool {
    const KIND: ReturnKind = ReturnKind::Bool;

    fn into_word(self) -> u64 {
        self as u64
    }
}

impl<T: 'static> CallbackParam for *const T {
    const KIND: ParamKind = ParamKind::Pointer;

    fn from_word(word: u64) -> *const T {
        word as usize as *const T
    }
}

impl<T: 'static> CallbackParam for *mut T {
    const KIND: ParamKind = ParamKind::Pointer;

    fn from_word(word: u64) -> *mut T {
        word as usize as *mut T
    }
}

impl<T: 'static> CallbackReturn for *const T {
    const KIND: ReturnKind = ReturnKind::Pointer;

    fn into_word(self) -> u64 {
        self as usize as u64
    }
}

impl<T: 'static> CallbackReturn for *mut T {
    const KIND: ReturnKind = ReturnKind::Pointer;

    fn into_word(self) -> u64 {
        self as usize as u64
    }
}

impl CallbackReturn for () {
    const KIND: ReturnKind = ReturnKind::Void;

    fn into_word(self) -> u64 {
        0
    }
}

/// A closure convertible into a native callback; `Args` is its parameter
/// tuple
pub trait IntoCallback<Args>: Send + Sync + 'static {
    fn signature() -> CallSignature;

    #[doc(hidden)]
    fn into_handler(self) -> RawHandler;
}

macro_rules! impl_callback {
    ($($param:ident : $arg:ident),*) => {
        impl<Func, R, $($param),*> IntoCallback<($($param,)*)> for Func
        where
            Func: Fn($($param),*) -> R + Send + Sync + 'static,
            R: CallbackReturn,
            $($param: CallbackParam,)*
        {
            fn signature() -> CallSignature {
                CallSignature::new(vec![$($param::KIND),*], R::KIND)
            }

            fn into_handler(self) -> RawHandler {
                Box::new(move |words: &[u64]| {
                    #[allow(unused_mut, unused_variables)]
                    let mut words = words.iter().copied();
                    $(let $arg = $param::from_word(words.next().unwrap_or(0));)*
                    self($($arg),*).into_word()
                })
            }
        }
    };
}

impl_callback!();
impl_callback!(A: a);
impl_callback!(A: a, B: b);
impl_callback!(A: a, B: b, C: c);
impl_callback!(A: a, B: b, C: c, D: d);
impl_callback!(A: a, B: b, C: c, D: d, E: e);
impl_callback!(A: a, B: b, C: c, D: d, E: e, G: g);
impl_callback!(A: a, B: b, C: c, D: d, E: e, G: g, H: h);
impl_callback!(A: a, B: b, C: c, D: d, E: e, G: g, H: h, I: i);
impl_callback!(A: a, B: b, C: c, D: d, E: e, G: g, H: h, I: i, J: j);

/// Register a typed closure in the process-wide callback table and return
/// the native address to hand out.
pub fn register_callback<Args, F>(closure: F) -> Result<CallbackAddress>
where
    F: IntoCallback<Args>,
{
    CallbackTable::global().register_raw(F::signature(), closure.into_handler())
}

/// Release a callback returned by [`register_callback`] or
/// [`CallbackTable::register`]
pub fn unregister_callback(address: CallbackAddress) -> Result<()> {
    CallbackTable::global().unregister(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::FfiError;

    #[repr(C)]
    #[derive(Clone, Copy)]
    struct Pair {
        a: i64,
        b: i64,
    }

    #[test]
    fn test_shape_signatures() {
        assert_eq!(
            <fn(Text, usize) -> i32 as Shape>::signature(),
            CallSignature::new(vec![ParamKind::Text, ParamKind::U64], ReturnKind::I32)
        );
        assert_eq!(
            <fn(BufferMut<i64>, u64, u64, *const std::ffi::c_void) as Shape>::signature(),
            CallSignature::new(
                vec![
                    ParamKind::Buffer,
                    ParamKind::U64,
                    ParamKind::U64,
                    ParamKind::Pointer
                ],
                ReturnKind::Void
            )
        );
        assert_eq!(
            <fn(ByValue<Pair>) as Shape>::signature().params()[0],
            ParamKind::Struct { size: 16, align: 8 }
        );
    }

    #[test]
    fn test_struct_rejected_before_resolve() {
        let loader = Loader::with_search_paths(Vec::new());
        let result = unsafe {
            bind::<fn(ByValue<Pair>) -> i64>(&loader, LibraryHandle::PROCESS, "no_such_symbol")
        };
        assert!(matches!(result, Err(FfiError::UnsupportedSignature { .. })));

        let result = unsafe {
            bind::<fn(i64) -> ByValue<Pair>>(&loader, LibraryHandle::PROCESS, "labs")
        };
        assert!(matches!(result, Err(FfiError::UnsupportedSignature { .. })));
    }

    #[test]
    fn test_callback_signature_from_closure() {
        fn signature_of<Args, F: IntoCallback<Args>>(_: &F) -> CallSignature {
            F::signature()
        }
        let cb = |a: *const i64, b: *const i64| -> i32 { (a as usize).cmp(&(b as usize)) as i32 };
        assert_eq!(
            signature_of(&cb),
            CallSignature::new(vec![ParamKind::Pointer, ParamKind::Pointer], ReturnKind::I32)
        );
        let unit = || {};
        assert_eq!(signature_of(&unit), CallSignature::new(vec![], ReturnKind::Void));
    }
}
