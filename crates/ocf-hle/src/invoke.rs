//! Register classification and call marshaling
//!
//! The Espresso EABI passes integer arguments in r3..r10 and floats in
//! f1 onward. 64-bit integers occupy an aligned register pair, which
//! in practice means the pair starts at an odd register since argument
//! passing begins at r3. Classification is done once when a function
//! is registered; dispatch just walks the precomputed layout.

use crate::library::{HleContext, HostFn};
use ocf_core::error::{KernelError, Result};
use ocf_cpu::core::Core;
use ocf_cpu::CoreScheduler;
use ocf_memory::AddressSpace;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Highest GPR usable for argument passing
const MAX_ARG_GPR: usize = 10;

/// Highest FPR usable for argument passing
const MAX_ARG_FPR: usize = 13;

/// Declared type of one parameter or return value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Any integer, pointer or bool that fits a single register
    U32,
    /// 64-bit integer, passed in a register pair
    U64,
    /// Single precision float, widened to f64 in an FPR
    F32,
    /// Double precision float
    F64,
    /// Variable argument marker, must be last
    VarArgs,
}

impl ParamKind {
    fn is_float(self) -> bool {
        matches!(self, ParamKind::F32 | ParamKind::F64)
    }
}

/// Declared signature of an HLE function
#[derive(Debug, Clone, Default)]
pub struct Signature {
    pub params: Vec<ParamKind>,
    pub ret: Option<ParamKind>,
    /// Member functions receive the object pointer in r3
    pub member: bool,
}

impl Signature {
    pub fn new(params: &[ParamKind], ret: Option<ParamKind>) -> Self {
        Self {
            params: params.to_vec(),
            ret,
            member: false,
        }
    }

    pub fn member(params: &[ParamKind], ret: Option<ParamKind>) -> Self {
        Self {
            params: params.to_vec(),
            ret,
            member: true,
        }
    }
}

/// Register assignment for one value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Gpr32(usize),
    /// Pair start; occupies this register and the next
    Gpr64(usize),
    Fpr(usize),
    /// Cursor snapshot for varargs consumers
    VarArgs { gpr: usize, fpr: usize },
}

/// Fully classified calling layout for a signature
#[derive(Debug, Clone, Default)]
pub struct CallLayout {
    /// Receiver register for member functions
    pub receiver: Option<usize>,
    pub args: Vec<Slot>,
    pub ret: Option<Slot>,
}

/// Assign registers to every parameter of `sig`
///
/// Deterministic for a given signature. Signatures that would spill to
/// the stack are rejected.
pub fn classify(sig: &Signature) -> Result<CallLayout> {
    let mut gpr = if sig.member { 4 } else { 3 };
    let mut fpr = 1;
    let mut args = Vec::with_capacity(sig.params.len());

    for (i, &param) in sig.params.iter().enumerate() {
        match param {
            ParamKind::U32 => {
                if gpr > MAX_ARG_GPR {
                    return Err(KernelError::BadSignature(format!(
                        "argument {} does not fit in registers",
                        i
                    ))
                    .into());
                }
                args.push(Slot::Gpr32(gpr));
                gpr += 1;
            }
            ParamKind::U64 => {
                // Pairs sit at an odd register; an even cursor rounds up
                let start = if gpr % 2 == 0 { gpr + 1 } else { gpr };
                if start + 1 > MAX_ARG_GPR {
                    return Err(KernelError::BadSignature(format!(
                        "argument {} does not fit in registers",
                        i
                    ))
                    .into());
                }
                args.push(Slot::Gpr64(start));
                gpr = start + 2;
            }
            ParamKind::F32 | ParamKind::F64 => {
                if fpr > MAX_ARG_FPR {
                    return Err(KernelError::BadSignature(format!(
                        "argument {} does not fit in float registers",
                        i
                    ))
                    .into());
                }
                args.push(Slot::Fpr(fpr));
                fpr += 1;
            }
            ParamKind::VarArgs => {
                if i + 1 != sig.params.len() {
                    return Err(
                        KernelError::BadSignature("varargs must be last".to_string()).into()
                    );
                }
                args.push(Slot::VarArgs { gpr, fpr });
            }
        }
    }

    let ret = match sig.ret {
        None => None,
        Some(ParamKind::VarArgs) => {
            return Err(KernelError::BadSignature("varargs return".to_string()).into())
        }
        Some(kind) if kind.is_float() => Some(Slot::Fpr(1)),
        Some(ParamKind::U64) => Some(Slot::Gpr64(3)),
        Some(_) => Some(Slot::Gpr32(3)),
    };

    Ok(CallLayout {
        receiver: sig.member.then_some(3),
        args,
        ret,
    })
}

/// A marshaled value crossing the guest/host boundary
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    U32(u32),
    U64(u64),
    F64(f64),
    VarArgs { gpr: usize, fpr: usize },
}

impl Value {
    pub fn as_u32(&self) -> u32 {
        match *self {
            Value::U32(v) => v,
            Value::U64(v) => v as u32,
            Value::F64(v) => v as u32,
            Value::VarArgs { .. } => 0,
        }
    }

    pub fn as_u64(&self) -> u64 {
        match *self {
            Value::U32(v) => u64::from(v),
            Value::U64(v) => v,
            Value::F64(v) => v as u64,
            Value::VarArgs { .. } => 0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::F64(v) => v,
            Value::U32(v) => f64::from(v),
            Value::U64(v) => v as f64,
            Value::VarArgs { .. } => 0.0,
        }
    }
}

fn read_slot(core: &Core, slot: Slot) -> Value {
    match slot {
        Slot::Gpr32(i) => Value::U32(core.gpr[i]),
        Slot::Gpr64(i) => Value::U64(core.gpr_pair(i)),
        Slot::Fpr(i) => Value::F64(core.fpr[i]),
        Slot::VarArgs { gpr, fpr } => Value::VarArgs { gpr, fpr },
    }
}

fn write_slot(core: &mut Core, slot: Slot, value: Value) {
    match slot {
        Slot::Gpr32(i) => core.gpr[i] = value.as_u32(),
        Slot::Gpr64(i) => core.set_gpr_pair(i, value.as_u64()),
        Slot::Fpr(i) => core.fpr[i] = value.as_f64(),
        Slot::VarArgs { .. } => {}
    }
}

/// Marshal a guest call into a host closure and its result back
///
/// The host call may block and let the guest thread migrate cores, so
/// the current core is re-fetched from the scheduler before the result
/// is written.
pub fn dispatch_call(
    layout: &CallLayout,
    host: &HostFn,
    name: &str,
    trace_enabled: &AtomicBool,
    memory: &AddressSpace,
    scheduler: &CoreScheduler,
) -> Result<()> {
    let args = {
        let core = scheduler.current();
        let core = core.lock();
        let mut args = Vec::with_capacity(layout.args.len() + 1);
        if let Some(receiver) = layout.receiver {
            args.push(Value::U32(core.gpr[receiver]));
        }
        for &slot in &layout.args {
            args.push(read_slot(&core, slot));
        }
        args
    };

    if trace_enabled.load(Ordering::Relaxed) {
        info!(func = name, ?args, "hle call");
    }

    let mut ctx = HleContext { memory, scheduler };
    let result = host(&mut ctx, &args)?;

    if let Some(ret_slot) = layout.ret {
        let core = scheduler.current();
        let mut core = core.lock();
        if let Some(value) = result {
            write_slot(&mut core, ret_slot, value);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_mixed_free_function() {
        // fn(u32, u64, f32, u32) -> u32
        let sig = Signature::new(
            &[ParamKind::U32, ParamKind::U64, ParamKind::F32, ParamKind::U32],
            Some(ParamKind::U32),
        );
        let layout = classify(&sig).unwrap();

        assert_eq!(layout.receiver, None);
        assert_eq!(
            layout.args,
            vec![Slot::Gpr32(3), Slot::Gpr64(5), Slot::Fpr(1), Slot::Gpr32(7)]
        );
        assert_eq!(layout.ret, Some(Slot::Gpr32(3)));
    }

    #[test]
    fn test_classify_member_function() {
        // receiver in r3, args start at r4
        let sig = Signature::member(&[ParamKind::U32, ParamKind::U64], Some(ParamKind::U64));
        let layout = classify(&sig).unwrap();

        assert_eq!(layout.receiver, Some(3));
        assert_eq!(layout.args, vec![Slot::Gpr32(4), Slot::Gpr64(5)]);
        assert_eq!(layout.ret, Some(Slot::Gpr64(3)));
    }

    #[test]
    fn test_classify_u64_at_odd_cursor_stays() {
        // First arg already leaves the cursor odd at r5
        let sig = Signature::new(&[ParamKind::U64, ParamKind::U64], None);
        let layout = classify(&sig).unwrap();
        assert_eq!(layout.args, vec![Slot::Gpr64(3), Slot::Gpr64(5)]);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let sig = Signature::new(
            &[ParamKind::F64, ParamKind::U32, ParamKind::U64],
            Some(ParamKind::F64),
        );
        let a = classify(&sig).unwrap();
        let b = classify(&sig).unwrap();
        assert_eq!(a.args, b.args);
        assert_eq!(a.ret, b.ret);
        assert_eq!(a.args, vec![Slot::Fpr(1), Slot::Gpr32(3), Slot::Gpr64(5)]);
        assert_eq!(a.ret, Some(Slot::Fpr(1)));
    }

    #[test]
    fn test_classify_rejects_register_spill() {
        let params = vec![ParamKind::U32; 9]; // r3..r11, one too many
        let sig = Signature::new(&params, None);
        assert!(classify(&sig).is_err());
    }

    #[test]
    fn test_classify_varargs_must_be_last() {
        let sig = Signature::new(&[ParamKind::VarArgs, ParamKind::U32], None);
        assert!(classify(&sig).is_err());

        let sig = Signature::new(&[ParamKind::U32, ParamKind::F32, ParamKind::VarArgs], None);
        let layout = classify(&sig).unwrap();
        assert_eq!(layout.args[2], Slot::VarArgs { gpr: 4, fpr: 2 });
    }

    #[test]
    fn test_read_write_slots() {
        let mut core = Core::new(1);
        core.gpr[3] = 0x11;
        core.gpr[5] = 0xAABB_CCDD;
        core.gpr[6] = 0x1122_3344;
        core.fpr[1] = 2.5;

        assert_eq!(read_slot(&core, Slot::Gpr32(3)), Value::U32(0x11));
        assert_eq!(read_slot(&core, Slot::Gpr64(5)), Value::U64(0xAABBCCDD_11223344));
        assert_eq!(read_slot(&core, Slot::Fpr(1)), Value::F64(2.5));

        write_slot(&mut core, Slot::Gpr64(3), Value::U64(0x55667788_99AABBCC));
        assert_eq!(core.gpr[3], 0x5566_7788);
        assert_eq!(core.gpr[4], 0x99AA_BBCC);
    }
}
