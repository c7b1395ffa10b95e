// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `infer-rt inspect` command: print graph metadata and the device
//! arguments derived from it.

use model_ir::{argument::argument_name, ArgumentDescriptor, IoDescriptor, MetadataLoader};
use std::path::PathBuf;

pub fn execute(model: PathBuf) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║           infer-rt · Metadata Inspector              ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    let metadata = MetadataLoader::load(&model)
        .map_err(|e| anyhow::anyhow!("failed to load metadata from '{}': {e}", model.display()))?;

    println!("  {}", metadata.summary());
    println!();

    let offset = metadata.inputs().len();
    print_slots("Inputs", metadata.inputs(), 0);
    print_slots("Outputs", metadata.outputs(), offset);
    Ok(())
}

fn print_slots(title: &str, slots: &[IoDescriptor], first_arg: usize) {
    println!("  {title}:");
    println!("  {:<4} {:<56} {:<28} {}", "Arg", "Slot", "Device argument", "Dims");
    println!("  {}", "-".repeat(100));
    for (i, desc) in slots.iter().enumerate() {
        let arg = ArgumentDescriptor::for_slot(desc, (first_arg + i) as u32);
        println!(
            "  {:<4} {:<56} {:<28} {:?}",
            arg.idx,
            desc.summary(),
            truncate(&argument_name(desc), 28),
            arg.dims
        );
    }
    println!();
}

/// Truncates a string to `max_len` with ellipsis if needed.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}
