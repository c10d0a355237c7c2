//! The privileged-identity stub filter installed on a task that joined the
//! container's user namespace: a classic seccomp BPF program that makes
//! `setuid`/`chown`/`setgroups` and friends succeed as no-ops instead of
//! actually running (inside a user namespace they'd either fail or be
//! meaningless anyway, but some package installers insist on calling them).
//!
//! `setfsuid`/`setfsgid` are special-cased: those two are also used as
//! *getters* (by passing `-1`), so only non-`-1` calls are stubbed; a `-1`
//! argument passes through to the real syscall.
//!
//! The program opens with an architecture check (x86_64 only); a syscall
//! entered through a different ABI carries syscall numbers in a different
//! space than the `libc::SYS_*` constants compared against below, so
//! without this guard such a call would fall through every comparison and
//! execute for real instead of being stubbed or rejected.

use std::mem;

use crate::error::Result;

const BPF_LD: u16 = 0x00;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_JMP: u16 = 0x05;
const BPF_JEQ: u16 = 0x10;
const BPF_RET: u16 = 0x06;
const BPF_K: u16 = 0x00;

// offsetof(struct seccomp_data, {nr,arch}) and .args[0], per <linux/seccomp.h>.
const SECCOMP_DATA_NR_OFFSET: u32 = 0;
const SECCOMP_DATA_ARCH_OFFSET: u32 = 4;
const SECCOMP_DATA_ARGS0_LOW_OFFSET: u32 = 16;

// EM_X86_64 | __AUDIT_ARCH_64BIT | __AUDIT_ARCH_LE, per <linux/audit.h>.
const AUDIT_ARCH_X86_64: u32 = 0xc000_003e;

const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;
const SECCOMP_RET_ERRNO: u32 = 0x0005_0000;
const SECCOMP_RET_KILL: u32 = 0x0000_0000;

const SECCOMP_FILTER_FLAG_SPEC_ALLOW: u64 = 1 << 2;

#[repr(C)]
struct SockFilter {
    code: u16,
    jt: u8,
    jf: u8,
    k: u32,
}

fn stmt(code: u16, k: u32) -> SockFilter {
    SockFilter { code: BPF_LD | code, jt: 0, jf: 0, k }
}

fn jump(code: u16, k: u32, jt: u8, jf: u8) -> SockFilter {
    SockFilter { code: BPF_JMP | code, jt, jf, k }
}

fn ret(k: u32) -> SockFilter {
    SockFilter { code: BPF_RET, jt: 0, jf: 0, k }
}

/// Syscalls unconditionally stubbed to return 0.
fn unconditional_stub_syscalls() -> Vec<i64> {
    vec![
        libc::SYS_setuid,
        libc::SYS_setgid,
        libc::SYS_setreuid,
        libc::SYS_setregid,
        libc::SYS_setresuid,
        libc::SYS_setresgid,
        libc::SYS_setgroups,
        libc::SYS_chown,
        libc::SYS_lchown,
        libc::SYS_fchown,
        libc::SYS_fchownat,
    ]
}

/// One BPF instruction, before label references are resolved to relative
/// offsets. Keeping labels symbolic until a final resolution pass avoids
/// hand-counting instruction distances, which is where these programs
/// traditionally grow off-by-one bugs.
enum Insn {
    Load(u32),
    /// Compare accumulator to `k`; `jt`/`jf` name a label to jump to on
    /// true/false respectively. `None` means "fall through to the next
    /// instruction".
    JumpEq(u32, &'static str, Option<&'static str>),
    Ret(u32),
    Label(&'static str),
}

/// Builds the BPF program: kill the thread outright on any architecture
/// other than x86_64 (a 32-bit or x32 syscall entry point would otherwise
/// sail past the `libc::SYS_*` comparisons below, which are 64-bit syscall
/// numbers, and reach the real kernel call), then load `nr`, compare
/// against every stubbed syscall in turn (falling through on each miss),
/// route `setfsuid` / `setfsgid` through an extra arg-inspection block
/// since those two are also used as getters via `-1`, and allow everything
/// else.
fn build_program() -> Vec<SockFilter> {
    let uncond = unconditional_stub_syscalls();
    let mut insns = vec![
        Insn::Load(SECCOMP_DATA_ARCH_OFFSET),
        Insn::JumpEq(AUDIT_ARCH_X86_64, "arch_ok", None),
        Insn::Ret(SECCOMP_RET_KILL),
        Insn::Label("arch_ok"),
        Insn::Load(SECCOMP_DATA_NR_OFFSET),
    ];

    for nr in &uncond {
        insns.push(Insn::JumpEq(*nr as u32, "stub", None));
    }
    insns.push(Insn::JumpEq(libc::SYS_setfsuid as u32, "check_setfsuid", None));
    insns.push(Insn::JumpEq(libc::SYS_setfsgid as u32, "check_setfsgid", None));
    insns.push(Insn::Ret(SECCOMP_RET_ALLOW));

    insns.push(Insn::Label("check_setfsuid"));
    insns.push(Insn::Load(SECCOMP_DATA_ARGS0_LOW_OFFSET));
    insns.push(Insn::JumpEq(0xffff_ffff, "allow", None));
    insns.push(Insn::JumpEq(0, "stub", Some("stub"))); // unconditional jump to stub

    insns.push(Insn::Label("check_setfsgid"));
    insns.push(Insn::Load(SECCOMP_DATA_ARGS0_LOW_OFFSET));
    insns.push(Insn::JumpEq(0xffff_ffff, "allow", None));
    insns.push(Insn::JumpEq(0, "stub", Some("stub")));

    insns.push(Insn::Label("allow"));
    insns.push(Insn::Ret(SECCOMP_RET_ALLOW));

    insns.push(Insn::Label("stub"));
    insns.push(Insn::Ret(SECCOMP_RET_ERRNO));

    resolve(insns)
}

/// Resolves symbolic labels to the relative `jt`/`jf` offsets classic BPF
/// jump instructions require, and drops `Label` pseudo-instructions from
/// the final program.
fn resolve(insns: Vec<Insn>) -> Vec<SockFilter> {
    let mut positions = std::collections::HashMap::new();
    let mut pc = 0u32;
    for insn in &insns {
        match insn {
            Insn::Label(name) => {
                positions.insert(*name, pc);
            }
            _ => pc += 1,
        }
    }

    let mut prog = Vec::new();
    let mut pc = 0u32;
    for insn in &insns {
        match insn {
            Insn::Label(_) => continue,
            Insn::Load(off) => {
                prog.push(stmt(BPF_W | BPF_ABS, *off));
                pc += 1;
            }
            Insn::Ret(k) => {
                prog.push(ret(*k));
                pc += 1;
            }
            Insn::JumpEq(k, jt_label, jf_label) => {
                let target_pc = pc + 1;
                let jt = (positions[jt_label] - target_pc) as u8;
                let jf = match jf_label {
                    Some(label) => (positions[label] - target_pc) as u8,
                    None => 0,
                };
                prog.push(jump(BPF_JEQ | BPF_K, *k, jt, jf));
                pc += 1;
            }
        }
    }
    prog
}

#[repr(C)]
struct SockFprog {
    len: u16,
    filter: *const SockFilter,
}

/// Installs the privileged-identity stub filter on the current thread.
/// Must be called after the relevant `setns` calls and before handing
/// control to the task's own code.
pub fn install() -> Result<()> {
    let program = build_program();
    let fprog = SockFprog {
        len: program.len() as u16,
        filter: program.as_ptr(),
    };

    unsafe {
        if libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) != 0 {
            return Err(stepcage_runtime::Error::Nix(nix::Error::last()).into());
        }
        let rc = libc::syscall(
            libc::SYS_seccomp,
            libc::SECCOMP_SET_MODE_FILTER,
            SECCOMP_FILTER_FLAG_SPEC_ALLOW,
            &fprog as *const SockFprog,
        );
        if rc != 0 {
            return Err(stepcage_runtime::Error::Nix(nix::Error::last()).into());
        }
    }
    mem::forget(program);
    Ok(())
}
