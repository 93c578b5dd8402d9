#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use bfl_codec::{compress_frame, decompress_frame, CompressOutcome, FRAME_HEADER_SIZE};
use bfl_list::{
    acquire, wire, AcquireOptions, Completion, HeapAllocator, SliceSource, SourceLayout,
};
use bfl_report::FatalCode;
use bfl_types::Extent;
use serde::Serialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize)]
struct InspectOutput {
    layout: &'static str,
    extent_count: u64,
    completion: Option<Completion>,
    extents: Vec<Extent>,
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "inspect" => {
            let Some(path) = args.next() else {
                bail!("inspect requires an image path");
            };
            let remaining: Vec<String> = args.collect();
            let json = remaining.iter().any(|a| a == "--json");
            let indirect = remaining.iter().any(|a| a == "--indirect");
            let trusted = remaining.iter().any(|a| a == "--trusted");
            inspect(Path::new(&path), json, indirect, trusted)
        }
        "pack" => {
            let Some(out_path) = args.next() else {
                bail!("pack requires an output path and start:length extents");
            };
            let remaining: Vec<String> = args.collect();
            pack(Path::new(&out_path), &remaining)
        }
        "compress" => {
            let Some(input) = args.next() else {
                bail!("compress requires <input> <output>");
            };
            let Some(output) = args.next() else {
                bail!("compress requires <input> <output>");
            };
            let remaining: Vec<String> = args.collect();
            let level = flag_value(&remaining, "--level")?.unwrap_or(3);
            compress(Path::new(&input), Path::new(&output), level)
        }
        "decompress" => {
            let Some(input) = args.next() else {
                bail!("decompress requires <input> <output>");
            };
            let Some(output) = args.next() else {
                bail!("decompress requires <input> <output>");
            };
            let remaining: Vec<String> = args.collect();
            let size = flag_value(&remaining, "--size")?.unwrap_or(1 << 20);
            decompress(Path::new(&input), Path::new(&output), size)
        }
        "faults" => {
            list_faults();
            Ok(())
        }
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn print_usage() {
    println!("bfl\n");
    println!("USAGE:");
    println!("  bfl inspect <image> [--json] [--indirect] [--trusted]");
    println!("  bfl pack <output> [--indirect] [--callback CB:ARG] <start:length>...");
    println!("  bfl compress <input> <output> [--level N]");
    println!("  bfl decompress <input> <output> [--size BYTES]");
    println!("  bfl faults");
}

/// Parse `--flag N` from a collected argument list.
fn flag_value<T: std::str::FromStr>(args: &[String], flag: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let Some(position) = args.iter().position(|a| a == flag) else {
        return Ok(None);
    };
    let Some(value) = args.get(position + 1) else {
        bail!("{flag} requires a value");
    };
    let value = value
        .parse::<T>()
        .with_context(|| format!("invalid value for {flag}: {value}"))?;
    Ok(Some(value))
}

fn parse_pair(raw: &str, what: &str) -> Result<(u64, u64)> {
    let Some((first, second)) = raw.split_once(':') else {
        bail!("{what} must look like A:B, got {raw}");
    };
    let first = first
        .parse::<u64>()
        .with_context(|| format!("invalid {what}: {raw}"))?;
    let second = second
        .parse::<u64>()
        .with_context(|| format!("invalid {what}: {raw}"))?;
    Ok((first, second))
}

fn inspect(path: &Path, json: bool, indirect: bool, trusted: bool) -> Result<()> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read image {}", path.display()))?;
    let source = SliceSource::new(&bytes);
    let alloc = HeapAllocator::new();

    let layout = if indirect {
        SourceLayout::Indirect
    } else {
        SourceLayout::Flat
    };
    let options = if trusted {
        AcquireOptions::trusted(layout)
    } else {
        AcquireOptions::untrusted(layout)
    };

    let list = acquire(&source, 0, &options, &alloc)
        .with_context(|| format!("failed to acquire free list from {}", path.display()))?;

    let output = InspectOutput {
        layout: match list.layout() {
            SourceLayout::Flat => "flat",
            SourceLayout::Indirect => "indirect",
        },
        extent_count: list.extent_count(),
        completion: list.completion(),
        extents: list.extents().collect(),
    };
    list.release(&alloc);

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("layout:  {}", output.layout);
        println!("extents: {}", output.extent_count);
        match output.completion {
            Some(completion) => println!(
                "completion: callback={:#x} arg={:#x}",
                completion.callback, completion.arg
            ),
            None => println!("completion: none"),
        }
        for (index, extent) in output.extents.iter().enumerate() {
            println!("  [{index}] start={} length={}", extent.start, extent.length);
        }
    }
    Ok(())
}

fn pack(out_path: &Path, args: &[String]) -> Result<()> {
    let indirect = args.iter().any(|a| a == "--indirect");

    let mut completion = None;
    let mut extents = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--indirect" => {}
            "--callback" => {
                let Some(raw) = iter.next() else {
                    bail!("--callback requires CB:ARG");
                };
                let (callback, callback_arg) = parse_pair(raw, "callback")?;
                if callback == 0 {
                    bail!("callback word must be non-zero to be carried");
                }
                completion = Some(Completion {
                    callback,
                    arg: callback_arg,
                });
            }
            raw => {
                let (start, length) = parse_pair(raw, "extent")?;
                extents.push(Extent::new(start, length));
            }
        }
    }

    let image = if indirect {
        // Single-file indirect image: the header points just past itself.
        let mut image = wire::encode_indirect_header(
            extents.len() as u64,
            completion,
            wire::INDIRECT_HEADER_SIZE as u64,
        );
        image.extend_from_slice(&wire::encode_extent_array(&extents));
        image
    } else {
        wire::encode_flat(&extents, completion)
    };

    fs::write(out_path, &image)
        .with_context(|| format!("failed to write image {}", out_path.display()))?;
    println!(
        "wrote {} ({} extents, {} bytes, {})",
        out_path.display(),
        extents.len(),
        image.len(),
        if indirect { "indirect" } else { "flat" },
    );
    Ok(())
}

fn compress(input: &Path, output: &Path, level: i32) -> Result<()> {
    let payload =
        fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    let mut frame = vec![0_u8; payload.len() + FRAME_HEADER_SIZE];

    match compress_frame(&payload, &mut frame, level) {
        CompressOutcome::Compressed(total) => {
            fs::write(output, &frame[..total])
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!(
                "wrote {} ({} -> {} bytes, level {level})",
                output.display(),
                payload.len(),
                total,
            );
            Ok(())
        }
        CompressOutcome::Stored => {
            bail!(
                "payload did not compress into {} bytes; keep the raw form",
                frame.len()
            )
        }
    }
}

fn decompress(input: &Path, output: &Path, size: usize) -> Result<()> {
    let frame = fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    let mut payload = vec![0_u8; size];

    let written = decompress_frame(&frame, &mut payload)
        .with_context(|| format!("failed to decompress {}", input.display()))?;
    fs::write(output, &payload[..written])
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!(
        "wrote {} ({} -> {written} bytes)",
        output.display(),
        frame.len(),
    );
    Ok(())
}

fn list_faults() {
    println!("code  name                detail");
    for code in FatalCode::all() {
        println!("{:>4}  {:<18}  {}", code.as_raw(), code.name(), code.detail());
    }
}
