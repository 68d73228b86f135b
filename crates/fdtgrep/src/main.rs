//! Extract portions from a flattened devicetree.
//!
//! Selects nodes, properties and compatible strings from a blob and emits
//! the selection as devicetree source, a raw fragment, or a rebuilt blob.

use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use fdtregion::{
    assemble_regions, find_regions, render_dts, Fdt, FilterKind, FilterSet, Flags, RenderOptions,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Devicetree source text
    Dts,
    /// A valid devicetree blob (implies header, reserve map, string table)
    Dtb,
    /// Raw fragment of the blob, for hashing
    Bin,
}

#[derive(Debug, Parser)]
#[command(
    name = "fdtgrep",
    version,
    about = "Extract portions from a flattened devicetree",
    after_help = "Any positional argument before the file matches like --include-match."
)]
struct Cli {
    /// Node path to include
    #[arg(short = 'n', long = "include-node", value_name = "PATH")]
    include_node: Vec<String>,

    /// Node path to exclude
    #[arg(short = 'N', long = "exclude-node", value_name = "PATH")]
    exclude_node: Vec<String>,

    /// Property name to include
    #[arg(short = 'p', long = "include-prop", value_name = "NAME")]
    include_prop: Vec<String>,

    /// Property name to exclude
    #[arg(short = 'P', long = "exclude-prop", value_name = "NAME")]
    exclude_prop: Vec<String>,

    /// Compatible string to include
    #[arg(short = 'c', long = "include-compat", value_name = "STRING")]
    include_compat: Vec<String>,

    /// Compatible string to exclude
    #[arg(short = 'C', long = "exclude-compat", value_name = "STRING")]
    exclude_compat: Vec<String>,

    /// Node/property/compatible string to include
    #[arg(short = 'g', long = "include-match", value_name = "STRING")]
    include_match: Vec<String>,

    /// Node/property/compatible string to exclude
    #[arg(short = 'G', long = "exclude-match", value_name = "STRING")]
    exclude_match: Vec<String>,

    /// Invert the sense of matching (select non-matching parts)
    #[arg(short = 'v', long = "invert-match")]
    invert: bool,

    /// Enter direct subnode names of matching nodes
    #[arg(short = 'e', long = "enter-node")]
    direct_subnodes: bool,

    /// Show all subnodes of matching nodes
    #[arg(short = 's', long = "show-subnodes")]
    all_subnodes: bool,

    /// Don't include supernodes of matching nodes
    #[arg(short = 'S', long = "skip-supernodes")]
    skip_supernodes: bool,

    /// Include the memory-reserve map in the output
    #[arg(short = 'm', long = "include-mem")]
    include_mem: bool,

    /// Include the string table in the output
    #[arg(short = 't', long = "show-stringtab")]
    string_tab: bool,

    /// Output a header
    #[arg(short = 'H', long = "show-header")]
    header: bool,

    /// Put "/dts-v1/;" on the first line of dts output
    #[arg(short = 'I', long = "show-version")]
    dts_version: bool,

    /// Output a region list instead of the content
    #[arg(short = 'l', long = "list-regions")]
    list_regions: bool,

    /// List strings in the string table
    #[arg(short = 'L', long = "list-strings")]
    list_strings: bool,

    /// Display file addresses
    #[arg(short = 'a', long = "show-address")]
    show_addr: bool,

    /// Display structure-block offsets
    #[arg(short = 'f', long = "show-offset")]
    show_offset: bool,

    /// Mark matching lines with +, others with -
    #[arg(short = 'd', long = "diff")]
    diff: bool,

    /// Show all nodes and tags, colouring those that match
    #[arg(short = 'A', long = "all")]
    all: bool,

    /// Output format
    #[arg(short = 'O', long = "out-format", value_enum, default_value_t = OutputFormat::Dts)]
    format: OutputFormat,

    /// Output file (default: stdout)
    #[arg(short = 'o', long = "out", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Patterns to match, then the blob file ('-' reads stdin)
    #[arg(value_name = "ARG", required = true)]
    args: Vec<String>,
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fdtgrep=warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn build_filters(cli: &Cli, patterns: &[String]) -> Result<FilterSet, fdtregion::FilterError> {
    let mut filters = FilterSet::new();
    for value in &cli.include_node {
        filters.include(FilterKind::NODE, value)?;
    }
    for value in &cli.exclude_node {
        filters.exclude(FilterKind::NODE, value)?;
    }
    for value in &cli.include_prop {
        filters.include(FilterKind::PROP, value)?;
    }
    for value in &cli.exclude_prop {
        filters.exclude(FilterKind::PROP, value)?;
    }
    for value in &cli.include_compat {
        filters.include(FilterKind::COMPAT, value)?;
    }
    for value in &cli.exclude_compat {
        filters.exclude(FilterKind::COMPAT, value)?;
    }
    for value in cli.include_match.iter().chain(patterns) {
        filters.include(FilterKind::ANY, value)?;
    }
    for value in &cli.exclude_match {
        filters.exclude(FilterKind::ANY, value)?;
    }
    if cli.invert {
        filters.invert()?;
    }
    Ok(filters)
}

fn run(cli: &Cli) -> CliResult {
    let (filename, patterns) = cli.args.split_last().ok_or("missing input file")?;

    let has_rules = !(cli.include_node.is_empty()
        && cli.exclude_node.is_empty()
        && cli.include_prop.is_empty()
        && cli.exclude_prop.is_empty()
        && cli.include_compat.is_empty()
        && cli.exclude_compat.is_empty()
        && cli.include_match.is_empty()
        && cli.exclude_match.is_empty()
        && patterns.is_empty());
    let filters = build_filters(cli, patterns)?;

    let mut flags = Flags::SUPERNODES;
    if cli.skip_supernodes {
        flags.remove(Flags::SUPERNODES);
    }
    if cli.direct_subnodes {
        flags |= Flags::DIRECT_SUBNODES;
    }
    if cli.all_subnodes {
        flags |= Flags::ALL_SUBNODES;
    }
    if cli.include_mem {
        flags |= Flags::ADD_MEM_RSVMAP;
    }
    if cli.string_tab {
        flags |= Flags::ADD_STRING_TAB;
    }

    // A valid blob needs all three extra pieces; force them on.
    let mut header = cli.header;
    if cli.format == OutputFormat::Dtb {
        header = true;
        flags |= Flags::ADD_MEM_RSVMAP | Flags::ADD_STRING_TAB;
    }

    let raw = if filename == "-" {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        buf
    } else {
        fs::read(filename)?
    };
    debug!(bytes = raw.len(), file = %filename, "read blob");

    let fdt = Fdt::from_bytes(&raw)?;
    if fdt.version() < 17 && has_rules {
        eprintln!(
            "Warning: version {} files are not fully supported",
            fdt.version()
        );
    }

    let regions = find_regions(&fdt, &filters, flags)?;
    debug!(
        regions = regions.len(),
        bytes = regions.iter().map(|r| r.size).sum::<usize>(),
        "selection complete"
    );

    let mut sink: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(fs::File::create(path)?),
        None => Box::new(io::stdout().lock()),
    };

    if cli.list_regions {
        writeln!(sink, "Regions: {}", regions.len())?;
        for (i, region) in regions.iter().enumerate() {
            writeln!(sink, "{i}:  {:<10x}  {:<10x}", region.offset, region.end())?;
        }
        return Ok(());
    }

    match cli.format {
        OutputFormat::Dts => {
            let opts = RenderOptions {
                all: cli.all,
                diff: cli.diff,
                show_addr: cli.show_addr,
                show_offset: cli.show_offset,
                colour: cli.all && io::stdout().is_terminal(),
                header,
                dts_version: cli.dts_version,
                list_strings: cli.list_strings,
            };
            let mut text = String::new();
            render_dts(&fdt, &regions, flags, &opts, &mut text)?;
            sink.write_all(text.as_bytes())?;
        }
        OutputFormat::Dtb | OutputFormat::Bin => {
            let blob = assemble_regions(&fdt, &regions, flags, header);
            debug!(bytes = blob.len(), "assembled output");
            sink.write_all(&blob)?;
        }
    }
    sink.flush()?;

    Ok(())
}
