//! coreinit.rpl
//!
//! The root system library every title links against. Only the small
//! surface guest loaders touch at startup is emulated here; anything
//! else falls through to the unimplemented-call path.

use crate::invoke::{ParamKind, Signature, Value};
use crate::library::Library;
use crate::typeinfo::TypeInfo;
use once_cell::sync::Lazy;
use std::time::Instant;
use tracing::info;

/// Espresso time base frequency, bus clock / 4
const TIMER_CLOCK: u64 = 62_156_250;

/// OSThread.tag, "tHrD"
const THREAD_TAG: u32 = 0x7448_7244;

const THREAD_SIZE: u32 = 0x680;

static BOOT_TIME: Lazy<Instant> = Lazy::new(Instant::now);

fn ticks_now() -> u64 {
    let elapsed = BOOT_TIME.elapsed();
    elapsed.as_secs() * TIMER_CLOCK
        + u64::from(elapsed.subsec_nanos()) * TIMER_CLOCK / 1_000_000_000
}

pub fn create() -> Library {
    let mut lib = Library::new("coreinit.rpl");

    lib.add_function(
        "OSReport",
        Signature::new(&[ParamKind::U32, ParamKind::VarArgs], None),
        std::sync::Arc::new(|ctx, args| {
            let text = ctx.memory.read_cstring(args[0].as_u32(), 0x400)?;
            info!(target: "guest", "{}", text.trim_end());
            Ok(None)
        }),
    )
    .expect("OSReport signature");

    lib.add_function(
        "OSGetTime",
        Signature::new(&[], Some(ParamKind::U64)),
        std::sync::Arc::new(|_, _| Ok(Some(Value::U64(ticks_now())))),
    )
    .expect("OSGetTime signature");

    lib.add_function(
        "OSGetSystemTime",
        Signature::new(&[], Some(ParamKind::U64)),
        std::sync::Arc::new(|_, _| Ok(Some(Value::U64(ticks_now())))),
    )
    .expect("OSGetSystemTime signature");

    lib.add_function(
        "OSGetCoreId",
        Signature::new(&[], Some(ParamKind::U32)),
        std::sync::Arc::new(|ctx, _| Ok(Some(Value::U32(ctx.scheduler.current_id() as u32)))),
    )
    .expect("OSGetCoreId signature");

    lib.add_function(
        "OSSleepTicks",
        Signature::new(&[ParamKind::U64], None),
        std::sync::Arc::new(|_, args| {
            let ticks = args[0].as_u64();
            let nanos = ticks.saturating_mul(1_000_000_000) / TIMER_CLOCK;
            std::thread::sleep(std::time::Duration::from_nanos(nanos));
            Ok(None)
        }),
    )
    .expect("OSSleepTicks signature");

    // Physical and effective addresses coincide in our address space
    lib.add_function(
        "OSEffectiveToPhysical",
        Signature::new(&[ParamKind::U32], Some(ParamKind::U32)),
        std::sync::Arc::new(|_, args| Ok(Some(Value::U32(args[0].as_u32())))),
    )
    .expect("OSEffectiveToPhysical signature");

    lib.add_data(
        "OSDefaultThread",
        THREAD_SIZE,
        8,
        Some(std::sync::Arc::new(|memory, addr| {
            memory.fill_zero(addr, THREAD_SIZE)?;
            memory.write_be32(addr, THREAD_TAG)?;
            Ok(())
        })),
    );

    lib.add_type_info(TypeInfo::new("OSThread"));

    lib
}
