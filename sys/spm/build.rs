// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeSet;
use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use serde::Deserialize;

/// Signal bits below this are reserved by the framework (the doorbell is
/// bit 3).
const FIRST_USER_SIGNAL: u32 = 1 << 4;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-env-changed=SPM_KCONFIG");

    let config = match env::var("SPM_KCONFIG") {
        Ok(text) => ron::de::from_str(&text)?,
        // No image configured; hosted builds and tests get empty tables.
        Err(env::VarError::NotPresent) => SpmConfig::default(),
        Err(e) => return Err(e.into()),
    };
    validate(&config)?;
    generate_statics(&config)?;
    Ok(())
}

fn validate(config: &SpmConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut ids = BTreeSet::new();
    for p in &config.partitions {
        if !ids.insert(p.id) {
            return Err(format!("duplicate partition id {}", p.id).into());
        }
    }

    let is_ipc = |id: i32| {
        config.partitions.iter().any(|p| {
            p.id == id && p.flags.contains(abi::PartitionFlags::IPC)
        })
    };
    let check_signal = |what: &str, signal: u32| {
        if !signal.is_power_of_two() || signal < FIRST_USER_SIGNAL {
            Err(format!("{what}: signal {signal:#x} is not a single user bit"))
        } else {
            Ok(())
        }
    };

    let mut sids = BTreeSet::new();
    let mut used: BTreeSet<(i32, u32)> = BTreeSet::new();
    for s in &config.services {
        if !sids.insert(s.sid) {
            return Err(format!("duplicate sid {:#x}", s.sid).into());
        }
        if !is_ipc(s.partition_id) {
            return Err(format!(
                "service {} is owned by partition {}, which doesn't do IPC",
                s.name, s.partition_id
            )
            .into());
        }
        check_signal(&s.name, s.signal)?;
        if !used.insert((s.partition_id, s.signal)) {
            return Err(format!("service {}: signal reused", s.name).into());
        }
    }
    for irq in &config.irqs {
        if !ids.contains(&irq.partition_id) {
            return Err(format!(
                "irq {} is bound to missing partition {}",
                irq.irq, irq.partition_id
            )
            .into());
        }
        check_signal(&format!("irq {}", irq.irq), irq.signal)?;
        if !used.insert((irq.partition_id, irq.signal)) {
            return Err(format!("irq {}: signal reused", irq.irq).into());
        }
    }
    Ok(())
}

fn generate_statics(
    config: &SpmConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let out = &PathBuf::from(
        env::var_os("OUT_DIR").ok_or("OUT_DIR not set by cargo")?,
    );
    let mut file = File::create(out.join("spm_config.rs"))?;

    writeln!(file, "// See build.rs for details")?;

    writeln!(
        file,
        "static SPM_PARTITIONS: [abi::PartitionDesc; {}] = [",
        config.partitions.len()
    )?;
    for p in &config.partitions {
        writeln!(file, "    abi::PartitionDesc {{")?;
        writeln!(file, "        id: {},", p.id)?;
        writeln!(
            file,
            "        flags: abi::PartitionFlags::from_bits_retain({:#x}),",
            p.flags.bits()
        )?;
        writeln!(file, "        priority: abi::Priority({:#x}),", p.priority.0)?;
        writeln!(file, "        entry_point: {:#010x},", p.entry_point)?;
        writeln!(file, "        entry_arg: {:#x},", p.entry_arg)?;
        writeln!(file, "        stack_base: {:#010x},", p.stack_base)?;
        writeln!(file, "        stack_top: {:#010x},", p.stack_top)?;
        writeln!(file, "    }},")?;
    }
    writeln!(file, "];")?;

    writeln!(
        file,
        "static SPM_SERVICES: [abi::ServiceDesc; {}] = [",
        config.services.len()
    )?;
    for s in &config.services {
        writeln!(file, "    abi::ServiceDesc {{")?;
        writeln!(file, "        name: {:?},", s.name)?;
        writeln!(file, "        partition_id: {},", s.partition_id)?;
        writeln!(file, "        signal: {:#x},", s.signal)?;
        writeln!(file, "        sid: {:#x},", s.sid)?;
        writeln!(file, "        non_secure_clients: {},", s.non_secure_clients)?;
        writeln!(file, "        minor_version: {},", s.minor_version)?;
        writeln!(
            file,
            "        version_policy: {},",
            s.version_policy as u32
        )?;
        writeln!(file, "    }},")?;
    }
    writeln!(file, "];")?;

    writeln!(
        file,
        "static SPM_IRQS: [abi::IrqDesc; {}] = [",
        config.irqs.len()
    )?;
    for irq in &config.irqs {
        writeln!(file, "    abi::IrqDesc {{")?;
        writeln!(file, "        irq: {},", irq.irq)?;
        writeln!(file, "        partition_id: {},", irq.partition_id)?;
        writeln!(file, "        signal: {:#x},", irq.signal)?;
        writeln!(file, "    }},")?;
    }
    writeln!(file, "];")?;

    Ok(())
}

#[derive(Default, Deserialize)]
struct SpmConfig {
    partitions: Vec<abi::PartitionDesc>,
    services: Vec<ServiceConfig>,
    #[serde(default)]
    irqs: Vec<abi::IrqDesc>,
}

/// `abi::ServiceDesc` borrows its name, so the build-time form owns it.
#[derive(Deserialize)]
struct ServiceConfig {
    name: String,
    partition_id: i32,
    signal: u32,
    sid: u32,
    non_secure_clients: bool,
    minor_version: u32,
    version_policy: abi::VersionPolicy,
}
