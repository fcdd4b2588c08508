use smallvec::SmallVec;

use crate::{
    error::{EngineError, ExecResult},
    lex::{Token, TokenKind},
    object::{ObjectArena, ObjectId},
    types::{Primitives, TypeId, TypeInfo, TypeRegistry},
};

/// Inline byte storage for scalar values; every primitive fits in 8 bytes.
pub(crate) type ScalarBytes = SmallVec<[u8; 8]>;

/// A transferable typed value produced by literals, arithmetic,
/// comparisons, and function returns.
///
/// Scalars carry their bytes inline; class values carry a non-owning
/// handle to the instance they were read from. Rvalues are short-lived:
/// they exist for the duration of the expression that produced them.
#[derive(Debug, Clone)]
pub struct ScriptRval {
    pub(crate) type_id: TypeId,
    pub(crate) reference: bool,
    pub(crate) data: RvalData,
}

#[derive(Debug, Clone)]
pub(crate) enum RvalData {
    /// The empty value returned by void functions.
    Void,
    /// Scalar bytes in the value's own width.
    Scalar(ScalarBytes),
    /// Non-owning handle to a class instance.
    Instance(ObjectId),
}

impl ScriptRval {
    pub(crate) fn void(void_id: TypeId) -> Self {
        Self {
            type_id: void_id,
            reference: false,
            data: RvalData::Void,
        }
    }

    pub(crate) fn scalar(type_id: TypeId, bytes: ScalarBytes) -> Self {
        Self {
            type_id,
            reference: false,
            data: RvalData::Scalar(bytes),
        }
    }

    pub(crate) fn instance(type_id: TypeId, obj: ObjectId) -> Self {
        Self {
            type_id,
            reference: true,
            data: RvalData::Instance(obj),
        }
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self.data, RvalData::Void)
    }

    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.reference
    }

    pub(crate) fn scalar_bytes(&self) -> ExecResult<&[u8]> {
        match &self.data {
            RvalData::Scalar(bytes) => Ok(bytes),
            RvalData::Void => Err(EngineError::runtime("void value used where a value is required")),
            RvalData::Instance(_) => Err(EngineError::type_error("class instance used where a scalar is required")),
        }
    }

    pub(crate) fn instance_id(&self) -> Option<ObjectId> {
        match self.data {
            RvalData::Instance(id) => Some(id),
            _ => None,
        }
    }
}

/// A scalar decoded out of its byte representation: the signed and
/// unsigned integer families keep their full 64-bit interpretation, floats
/// ride as `f64`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Scalar {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

/// Decodes `bytes` as a value of `info`.
///
/// Integer widening happens here: a signed source sign-extends to 64 bits,
/// an unsigned source zero-extends, so every later narrowing keeps the
/// source's sign rules.
pub(crate) fn read_scalar(bytes: &[u8], info: &TypeInfo) -> ExecResult<Scalar> {
    if info.is_void() {
        return Err(EngineError::type_error("void has no value"));
    }
    if bytes.len() < info.size() {
        return Err(EngineError::runtime("scalar storage shorter than its type"));
    }
    let bytes = &bytes[..info.size()];
    if info.is_float() {
        let value = match info.size() {
            4 => f64::from(f32::from_le_bytes(bytes.try_into().expect("size checked"))),
            8 => f64::from_le_bytes(bytes.try_into().expect("size checked")),
            _ => return Err(EngineError::type_error("unsupported float width")),
        };
        return Ok(Scalar::Float(value));
    }
    if !matches!(info.size(), 1 | 2 | 4 | 8) {
        return Err(EngineError::type_error("unsupported integer width"));
    }
    let mut raw = [0u8; 8];
    raw[..bytes.len()].copy_from_slice(bytes);
    if info.is_unsigned() {
        Ok(Scalar::Unsigned(u64::from_le_bytes(raw)))
    } else {
        // Sign-extend from the source width.
        let shift = 64 - 8 * info.size() as u32;
        let value = (i64::from_le_bytes(raw) << shift) >> shift;
        Ok(Scalar::Signed(value))
    }
}

/// Encodes a scalar into the byte representation of `dest`.
///
/// Narrowing integer conversion truncates to the low bytes; float-to-int
/// truncates toward zero; int-to-float converts through the source's
/// signedness, which [`read_scalar`] already applied.
pub(crate) fn scalar_to_bytes(value: Scalar, dest: &TypeInfo) -> ExecResult<ScalarBytes> {
    if dest.is_void() {
        return Err(EngineError::type_error("cannot store a value into void"));
    }
    if dest.is_float() {
        let f = match value {
            Scalar::Signed(v) => v as f64,
            Scalar::Unsigned(v) => v as f64,
            Scalar::Float(v) => v,
        };
        return Ok(match dest.size() {
            4 => SmallVec::from_slice(&(f as f32).to_le_bytes()),
            8 => SmallVec::from_slice(&f.to_le_bytes()),
            _ => return Err(EngineError::type_error("unsupported float width")),
        });
    }
    if !matches!(dest.size(), 1 | 2 | 4 | 8) {
        return Err(EngineError::type_error("unsupported integer width"));
    }
    let raw: u64 = match value {
        Scalar::Signed(v) => v as u64,
        Scalar::Unsigned(v) => v,
        Scalar::Float(f) => {
            let t = f.trunc();
            if dest.is_unsigned() {
                t as u64
            } else {
                t as i64 as u64
            }
        }
    };
    let all = raw.to_le_bytes();
    Ok(SmallVec::from_slice(&all[..dest.size()]))
}

/// The scalar cell of the conversion matrix: re-encode `bytes` from
/// `src` to `dest`, preserving width and sign semantics.
pub(crate) fn convert_scalar(bytes: &[u8], src: &TypeInfo, dest: &TypeInfo) -> ExecResult<ScalarBytes> {
    scalar_to_bytes(read_scalar(bytes, src)?, dest)
}

/// Builds an rvalue from an integer or decimal literal token.
///
/// Integers become `int` when they fit `i32` and `long` otherwise;
/// decimals prefer `float` and fall back to `double` when the value is out
/// of `f32` range.
pub(crate) fn rval_from_literal(token: &Token, prims: &Primitives) -> ExecResult<ScriptRval> {
    match token.kind {
        TokenKind::Integer => {
            let value: i64 = token
                .lexeme
                .parse()
                .map_err(|_| EngineError::parse(format!("integer literal '{}' out of range", token.lexeme)).at(token.loc()))?;
            if i32::try_from(value).is_ok() {
                Ok(ScriptRval::scalar(
                    prims.int_,
                    SmallVec::from_slice(&(value as i32).to_le_bytes()),
                ))
            } else {
                Ok(ScriptRval::scalar(prims.long_, SmallVec::from_slice(&value.to_le_bytes())))
            }
        }
        TokenKind::Decimal => {
            let value: f64 = token
                .lexeme
                .parse()
                .map_err(|_| EngineError::parse(format!("decimal literal '{}' is invalid", token.lexeme)).at(token.loc()))?;
            if value.abs() <= f64::from(f32::MAX) {
                Ok(ScriptRval::scalar(
                    prims.float_,
                    SmallVec::from_slice(&(value as f32).to_le_bytes()),
                ))
            } else {
                Ok(ScriptRval::scalar(prims.double_, SmallVec::from_slice(&value.to_le_bytes())))
            }
        }
        _ => Err(EngineError::parse(format!("token '{}' is not a literal", token.lexeme)).at(token.loc())),
    }
}

/// Binary operators the evaluator knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Less,
    Leq,
    Greater,
    Geq,
    Neq,
    Eq,
}

impl BinOp {
    pub fn from_token(kind: TokenKind) -> Option<Self> {
        let op = match kind {
            TokenKind::Plus => Self::Add,
            TokenKind::Minus => Self::Sub,
            TokenKind::Star => Self::Mul,
            TokenKind::Slash => Self::Div,
            TokenKind::Less => Self::Less,
            TokenKind::Leq => Self::Leq,
            TokenKind::Greater => Self::Greater,
            TokenKind::Geq => Self::Geq,
            TokenKind::Neq => Self::Neq,
            TokenKind::Eq => Self::Eq,
            _ => return None,
        };
        Some(op)
    }

    fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Less | Self::Leq | Self::Greater | Self::Geq | Self::Neq | Self::Eq
        )
    }
}

/// Picks the type both operands are brought to before the operation:
/// `double` beats `float` beats integers; between integers the larger
/// width wins and on equal width the left operand's signedness does.
fn promote(lhs: &TypeInfo, rhs: &TypeInfo, prims: &Primitives) -> TypeId {
    if lhs.name() == "double" || rhs.name() == "double" {
        return prims.double_;
    }
    if lhs.is_float() || rhs.is_float() {
        return prims.float_;
    }
    if rhs.size() > lhs.size() {
        rhs.type_id()
    } else {
        lhs.type_id()
    }
}

/// Applies a binary operator to two scalar rvalues, carrying the
/// arithmetic out at the promoted type's precision. Integer results wrap
/// at the result width; integer division by zero is fatal; float division
/// by zero follows IEEE. Comparisons yield `bool`, with `==` defined as
/// the negation of `!=`.
pub(crate) fn apply_binary(
    op: BinOp,
    lhs: &ScriptRval,
    rhs: &ScriptRval,
    types: &TypeRegistry,
    prims: &Primitives,
) -> ExecResult<ScriptRval> {
    let l_info = types.get(lhs.type_id);
    let r_info = types.get(rhs.type_id);
    if l_info.is_class() || r_info.is_class() {
        return Err(EngineError::type_error("binary operators require scalar operands"));
    }

    let result_ty = promote(l_info, r_info, prims);
    let info = types.get(result_ty);
    let l = read_scalar(&convert_scalar(lhs.scalar_bytes()?, l_info, info)?, info)?;
    let r = read_scalar(&convert_scalar(rhs.scalar_bytes()?, r_info, info)?, info)?;

    if op.is_comparison() {
        let not_equal = scalar_ne(l, r);
        let truth = match op {
            BinOp::Less => scalar_lt(l, r),
            BinOp::Greater => scalar_lt(r, l),
            BinOp::Leq => !scalar_lt(r, l),
            BinOp::Geq => !scalar_lt(l, r),
            BinOp::Neq => not_equal,
            BinOp::Eq => !not_equal,
            _ => unreachable!("comparison checked above"),
        };
        return Ok(ScriptRval::scalar(prims.bool_, SmallVec::from_slice(&[u8::from(truth)])));
    }

    let result = match (l, r) {
        (Scalar::Float(a), Scalar::Float(b)) => {
            // Floats divide by zero into NaN/Inf per IEEE.
            let value = if info.size() == 4 {
                let (a, b) = (a as f32, b as f32);
                f64::from(match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    _ => unreachable!("arithmetic op"),
                })
            } else {
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    _ => unreachable!("arithmetic op"),
                }
            };
            Scalar::Float(value)
        }
        (Scalar::Unsigned(a), Scalar::Unsigned(b)) => {
            if op == BinOp::Div && mask_to_width(b, info.size()) == 0 {
                return Err(EngineError::runtime("integer division by zero"));
            }
            let value = match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::Div => mask_to_width(a, info.size()) / mask_to_width(b, info.size()),
                _ => unreachable!("arithmetic op"),
            };
            Scalar::Unsigned(value)
        }
        (Scalar::Signed(a), Scalar::Signed(b)) => {
            if op == BinOp::Div && b == 0 {
                return Err(EngineError::runtime("integer division by zero"));
            }
            let value = match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::Div => a.wrapping_div(b),
                _ => unreachable!("arithmetic op"),
            };
            Scalar::Signed(value)
        }
        _ => unreachable!("operands converted to a common scalar family"),
    };
    // Wrapping at the result width happens on store: only the low
    // `size` bytes survive.
    Ok(ScriptRval::scalar(result_ty, scalar_to_bytes(result, info)?))
}

fn mask_to_width(value: u64, size: usize) -> u64 {
    if size >= 8 {
        value
    } else {
        value & ((1u64 << (8 * size)) - 1)
    }
}

fn scalar_ne(l: Scalar, r: Scalar) -> bool {
    match (l, r) {
        (Scalar::Float(a), Scalar::Float(b)) => a != b,
        (Scalar::Unsigned(a), Scalar::Unsigned(b)) => a != b,
        (Scalar::Signed(a), Scalar::Signed(b)) => a != b,
        _ => unreachable!("operands converted to a common scalar family"),
    }
}

fn scalar_lt(l: Scalar, r: Scalar) -> bool {
    match (l, r) {
        (Scalar::Float(a), Scalar::Float(b)) => a < b,
        (Scalar::Unsigned(a), Scalar::Unsigned(b)) => a < b,
        (Scalar::Signed(a), Scalar::Signed(b)) => a < b,
        _ => unreachable!("operands converted to a common scalar family"),
    }
}

/// True when the scalar is non-zero; the condition rule for `if`, `while`,
/// and `for`.
pub(crate) fn scalar_truthy(value: Scalar) -> bool {
    match value {
        Scalar::Signed(v) => v != 0,
        Scalar::Unsigned(v) => v != 0,
        Scalar::Float(v) => v != 0.0,
    }
}

/// Writes an rvalue into an object through the conversion matrix.
///
/// REFERENCE destinations alias the source instance and bump its count;
/// class destinations deep-copy field-wise (names must match pairwise and
/// the classes must be layout-compatible); scalar destinations convert and
/// overwrite. Const enforcement is the caller's job: declarations write
/// their initializer through this same path.
pub(crate) fn assign_rval(
    arena: &mut ObjectArena,
    types: &TypeRegistry,
    dest: ObjectId,
    src: &ScriptRval,
) -> ExecResult<()> {
    let dest_ty = arena.get(dest).type_id;
    let dest_info = types.get(dest_ty);

    if arena.get(dest).is_reference() {
        let Some(target) = src.instance_id() else {
            return Err(EngineError::type_error("a reference must be bound to an object"));
        };
        let target_ty = arena.get(target).type_id;
        if !types.classes_compatible(dest_ty, target_ty) && dest_ty != target_ty {
            return Err(EngineError::type_error(format!(
                "cannot bind a reference of type '{}' to an object of type '{}'",
                dest_info.name(),
                types.get(target_ty).name()
            )));
        }
        return arena.bind_alias(dest, target);
    }

    if dest_info.is_class() {
        let Some(src_obj) = src.instance_id() else {
            return Err(EngineError::type_error(format!(
                "cannot assign a scalar to class '{}'",
                dest_info.name()
            )));
        };
        return copy_object(arena, types, dest, src_obj);
    }

    if src.is_void() {
        return Err(EngineError::type_error("cannot assign a void value"));
    }
    if let Some(src_obj) = src.instance_id() {
        return copy_object(arena, types, dest, src_obj);
    }
    let src_info = types.get(src.type_id);
    if src_info.is_class() {
        return Err(EngineError::type_error("cannot assign a class value to a scalar"));
    }
    let bytes = convert_scalar(src.scalar_bytes()?, src_info, dest_info)?;
    arena.write(dest, &bytes)
}

/// Object-to-object copy: scalars convert through the matrix, class
/// instances copy field by field. Used by identifier initializers,
/// class assignment, and argument binding from object reads.
pub(crate) fn copy_object(
    arena: &mut ObjectArena,
    types: &TypeRegistry,
    dest: ObjectId,
    src: ObjectId,
) -> ExecResult<()> {
    let dest_ty = arena.get(dest).type_id;
    let src_ty = arena.get(src).type_id;
    let dest_info = types.get(dest_ty);
    let src_info = types.get(src_ty);

    match (dest_info.is_class(), src_info.is_class()) {
        (true, true) => {
            if !types.classes_compatible(dest_ty, src_ty) {
                return Err(EngineError::type_error(format!(
                    "cannot copy between unrelated classes '{}' and '{}'",
                    dest_info.name(),
                    src_info.name()
                )));
            }
            let pairs: Vec<(ObjectId, ObjectId)> = {
                let dest_fields = &arena.get(dest).fields;
                let src_data = arena.get(src);
                let mut pairs = Vec::with_capacity(dest_fields.len());
                for (name, dest_field) in dest_fields {
                    let src_field = src_data.field(name).ok_or_else(|| {
                        EngineError::type_error(format!("source class has no field '{name}'"))
                    })?;
                    pairs.push((*dest_field, src_field));
                }
                pairs
            };
            for (dest_field, src_field) in pairs {
                copy_object(arena, types, dest_field, src_field)?;
            }
            Ok(())
        }
        (false, false) => {
            let bytes = arena.read(src, src_info.size())?;
            let converted = convert_scalar(&bytes, src_info, dest_info)?;
            arena.write(dest, &converted)
        }
        _ => Err(EngineError::type_error(format!(
            "cannot copy between '{}' and '{}'",
            src_info.name(),
            dest_info.name()
        ))),
    }
}

/// Reads an object into an rvalue: scalars copy their bytes out, class
/// instances come back as a non-owning handle.
pub(crate) fn read_object(arena: &ObjectArena, types: &TypeRegistry, obj: ObjectId) -> ExecResult<ScriptRval> {
    let type_id = arena.get(obj).type_id;
    let info = types.get(type_id);
    if info.is_class() {
        Ok(ScriptRval::instance(type_id, obj))
    } else {
        let bytes = arena.read(obj, info.size())?;
        Ok(ScriptRval::scalar(type_id, bytes))
    }
}

/// Renders a scalar the way a C-family host would print it: integers in
/// decimal, floats with the shortest round-trip representation and no
/// trailing `.0`.
pub(crate) fn format_scalar(value: Scalar) -> String {
    match value {
        Scalar::Signed(v) => v.to_string(),
        Scalar::Unsigned(v) => v.to_string(),
        Scalar::Float(v) => {
            if !v.is_finite() {
                return if v.is_nan() {
                    "nan".to_owned()
                } else if v > 0.0 {
                    "inf".to_owned()
                } else {
                    "-inf".to_owned()
                };
            }
            let mut buf = ryu::Buffer::new();
            let text = buf.format(v);
            text.strip_suffix(".0").unwrap_or(text).to_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Modifiers;

    fn setup() -> (TypeRegistry, Primitives) {
        let mut reg = TypeRegistry::new();
        let ids = reg.seed_primitives();
        let prims = Primitives::from_seed(&ids);
        (reg, prims)
    }

    fn int_rval(prims: &Primitives, v: i32) -> ScriptRval {
        ScriptRval::scalar(prims.int_, SmallVec::from_slice(&v.to_le_bytes()))
    }

    fn double_rval(prims: &Primitives, v: f64) -> ScriptRval {
        ScriptRval::scalar(prims.double_, SmallVec::from_slice(&v.to_le_bytes()))
    }

    #[test]
    fn promotion_prefers_double_then_float_then_width() {
        let (reg, prims) = setup();
        let int5 = int_rval(&prims, 5);
        let d = double_rval(&prims, 2.5);
        let out = apply_binary(BinOp::Div, &int5, &d, &reg, &prims).unwrap();
        assert_eq!(out.type_id(), prims.double_);
        let info = reg.get(out.type_id());
        let value = read_scalar(out.scalar_bytes().unwrap(), info).unwrap();
        assert_eq!(value, Scalar::Float(2.0));
    }

    #[test]
    fn equal_width_takes_left_signedness() {
        let (reg, prims) = setup();
        let lhs = ScriptRval::scalar(prims.uint, SmallVec::from_slice(&3u32.to_le_bytes()));
        let rhs = int_rval(&prims, 4);
        let out = apply_binary(BinOp::Add, &lhs, &rhs, &reg, &prims).unwrap();
        assert_eq!(out.type_id(), prims.uint);
    }

    #[test]
    fn integer_addition_wraps_at_result_width() {
        let (reg, prims) = setup();
        let a = int_rval(&prims, i32::MAX);
        let b = int_rval(&prims, 1);
        let out = apply_binary(BinOp::Add, &a, &b, &reg, &prims).unwrap();
        let value = read_scalar(out.scalar_bytes().unwrap(), reg.get(out.type_id())).unwrap();
        assert_eq!(value, Scalar::Signed(i64::from(i32::MIN)));
    }

    #[test]
    fn integer_division_by_zero_is_fatal_float_is_not() {
        let (reg, prims) = setup();
        let a = int_rval(&prims, 1);
        let z = int_rval(&prims, 0);
        assert!(apply_binary(BinOp::Div, &a, &z, &reg, &prims).is_err());

        let f = double_rval(&prims, 1.0);
        let fz = double_rval(&prims, 0.0);
        let out = apply_binary(BinOp::Div, &f, &fz, &reg, &prims).unwrap();
        let value = read_scalar(out.scalar_bytes().unwrap(), reg.get(out.type_id())).unwrap();
        assert_eq!(value, Scalar::Float(f64::INFINITY));
    }

    #[test]
    fn comparisons_yield_bool_and_eq_negates_neq() {
        let (reg, prims) = setup();
        let a = int_rval(&prims, 3);
        let b = int_rval(&prims, 3);
        let eq = apply_binary(BinOp::Eq, &a, &b, &reg, &prims).unwrap();
        assert_eq!(eq.type_id(), prims.bool_);
        assert_eq!(eq.scalar_bytes().unwrap(), &[1]);
        let ne = apply_binary(BinOp::Neq, &a, &b, &reg, &prims).unwrap();
        assert_eq!(ne.scalar_bytes().unwrap(), &[0]);
    }

    #[test]
    fn conversion_round_trip_masks_to_smaller_width() {
        let (reg, prims) = setup();
        let int_info = reg.get(prims.int_);
        let char_info = reg.get(prims.char_);
        // int -> char -> int keeps the sign-extended low byte.
        let src = 0x1_82i32.to_le_bytes(); // low byte 0x82 = -126 as i8
        let narrowed = convert_scalar(&src, int_info, char_info).unwrap();
        assert_eq!(narrowed.as_slice(), &[0x82]);
        let widened = convert_scalar(&narrowed, char_info, int_info).unwrap();
        assert_eq!(i32::from_le_bytes(widened.as_slice().try_into().unwrap()), -126);
        // Unsigned source zero-extends instead.
        let uchar_info = reg.get(prims.uchar);
        let widened = convert_scalar(&[0x82], uchar_info, int_info).unwrap();
        assert_eq!(i32::from_le_bytes(widened.as_slice().try_into().unwrap()), 0x82);
    }

    #[test]
    fn float_to_int_truncates_toward_zero() {
        let (reg, prims) = setup();
        let double_info = reg.get(prims.double_);
        let int_info = reg.get(prims.int_);
        let bytes = convert_scalar(&2.9f64.to_le_bytes(), double_info, int_info).unwrap();
        assert_eq!(i32::from_le_bytes(bytes.as_slice().try_into().unwrap()), 2);
        let bytes = convert_scalar(&(-2.9f64).to_le_bytes(), double_info, int_info).unwrap();
        assert_eq!(i32::from_le_bytes(bytes.as_slice().try_into().unwrap()), -2);
    }

    #[test]
    fn literal_typing_follows_width() {
        let (_, prims) = setup();
        let tok = |kind, lexeme: &str| Token::new(kind, lexeme, 1, 1);
        let small = rval_from_literal(&tok(TokenKind::Integer, "41"), &prims).unwrap();
        assert_eq!(small.type_id(), prims.int_);
        let big = rval_from_literal(&tok(TokenKind::Integer, "4294967296"), &prims).unwrap();
        assert_eq!(big.type_id(), prims.long_);
        let dec = rval_from_literal(&tok(TokenKind::Decimal, "2.5"), &prims).unwrap();
        assert_eq!(dec.type_id(), prims.float_);
    }

    #[test]
    fn class_copy_requires_matching_layout() {
        let (mut reg, prims) = setup();
        let p = reg.alloc("P", 0, false, true);
        let f = reg.clone_as_member(prims.int_, 0, p, crate::types::Visibility::Public);
        {
            let info = reg.get_mut(p);
            info.fields.insert("v".to_owned(), f);
            info.size = 4;
        }
        let q = reg.alloc("Q", 0, false, true);
        let g = reg.clone_as_member(prims.int_, 0, q, crate::types::Visibility::Public);
        {
            let info = reg.get_mut(q);
            info.fields.insert("w".to_owned(), g);
            info.size = 4;
        }

        let mut arena = ObjectArena::new();
        let a = arena.create(&reg, p, "a", Modifiers::NONE);
        let b = arena.create(&reg, p, "b", Modifiers::NONE);
        let c = arena.create(&reg, q, "c", Modifiers::NONE);

        let av = arena.get(a).field("v").unwrap();
        arena.write(av, &9i32.to_le_bytes()).unwrap();
        copy_object(&mut arena, &reg, b, a).unwrap();
        let bv = arena.get(b).field("v").unwrap();
        assert_eq!(arena.read(bv, 4).unwrap().as_slice(), &9i32.to_le_bytes());

        assert!(copy_object(&mut arena, &reg, c, a).is_err());
    }

    #[test]
    fn format_trims_whole_floats() {
        assert_eq!(format_scalar(Scalar::Float(2.0)), "2");
        assert_eq!(format_scalar(Scalar::Float(2.5)), "2.5");
        assert_eq!(format_scalar(Scalar::Signed(-3)), "-3");
    }
}
