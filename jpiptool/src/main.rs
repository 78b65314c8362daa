use clap::Parser;
use log::{info, warn};
use std::error;
use std::error::Error;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::sync::Arc;

use jpip::{
    parse_query, reconstruct_j2k, reconstruct_jp2, write_indexed_jp2, Channel, FileSource,
    LogSink, StreamParser, Target, Transport, ViewWindowRequest,
};

#[derive(Debug)]
enum JPIPToolError {
    OpeningTarget { error: String },
    Request { error: String },
    ParsingStream { error: String },
    Reconstructing { error: String },
    InvalidArgument { name: String, value: String },
}

impl error::Error for JPIPToolError {}
impl fmt::Display for JPIPToolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::OpeningTarget { error } => write!(f, "error opening target {}", error),
            Self::Request { error } => write!(f, "error serving request {}", error),
            Self::ParsingStream { error } => write!(f, "error parsing jpip stream {}", error),
            Self::Reconstructing { error } => write!(f, "error reconstructing image {}", error),
            Self::InvalidArgument { name, value } => {
                write!(f, "invalid value {:?} for {}", value, name)
            }
        }
    }
}

#[derive(Parser)]
struct Opts {
    #[clap(subcommand)]
    subcommand: SubCommand,
}

#[derive(Parser)]
enum SubCommand {
    /// Print the data-bin index of a .jp2 file or raw codestream
    Index(Index),

    /// Serve one view-window request and write the response stream
    Request(Request),

    /// Rebuild a codestream or .jp2 file from a received stream
    Reconstruct(Reconstruct),

    /// Rewrite an image as a .jp2 file carrying a codestream index box
    Wrap(Wrap),
}

#[derive(Parser)]
struct Index {
    /// Path to .jp2 or .j2c file
    path: String,
}

#[derive(Parser)]
struct Request {
    /// Path to .jp2 or .j2c file
    path: String,

    /// JPIP query string, e.g. "fsiz=256,256&layers=2&len=4096". The
    /// options below override its fields.
    #[clap(short, long)]
    query: Option<String>,

    /// Frame size as "width,height"
    #[clap(long)]
    fsiz: Option<String>,

    /// Discarded decomposition levels
    #[clap(long)]
    level: Option<u8>,

    /// Region offset as "x,y" on the reduced frame
    #[clap(long)]
    roff: Option<String>,

    /// Region size as "width,height" on the reduced frame
    #[clap(long)]
    rsiz: Option<String>,

    /// Quality layers; selects precinct delivery when packets are indexed
    #[clap(long)]
    layers: Option<u16>,

    /// Response byte limit
    #[clap(long)]
    len: Option<u64>,

    /// Output stream path
    #[clap(short, long)]
    output: String,
}

#[derive(Parser)]
struct Reconstruct {
    /// Path to a received JPT- or JPP-stream
    path: String,

    /// Output path
    #[clap(short, long)]
    output: String,

    /// Write a .jp2 file instead of a raw codestream
    #[clap(long)]
    jp2: bool,

    /// Discarded decomposition levels
    #[clap(short, long, default_value = "0")]
    level: u8,

    /// Codestream serial number
    #[clap(long, default_value = "0")]
    csn: u64,
}

#[derive(Parser)]
struct Wrap {
    /// Path to .jp2 or .j2c file
    path: String,

    /// Output .jp2 path
    #[clap(short, long)]
    output: String,
}

fn pair(name: &str, value: &str) -> Result<(u32, u32), JPIPToolError> {
    let invalid = || JPIPToolError::InvalidArgument {
        name: name.to_owned(),
        value: value.to_owned(),
    };
    let (x, y) = value.split_once(',').ok_or_else(invalid)?;
    Ok((
        x.trim().parse().map_err(|_| invalid())?,
        y.trim().parse().map_err(|_| invalid())?,
    ))
}

fn open_target(path: &str) -> Result<Target, JPIPToolError> {
    Target::open_file(path, 0, &LogSink).map_err(|error| JPIPToolError::OpeningTarget {
        error: error.to_string(),
    })
}

fn print_index(target: &Target) {
    let index = target.index();
    let siz = index.siz();
    println!("target:        {}", target.name());
    println!(
        "format:        {}",
        if index.is_jp2 { "jp2" } else { "j2c" }
    );
    println!(
        "codestream:    {} bytes at {}",
        index.codestream_length, index.codestream_offset
    );
    println!(
        "image:         {}x{}, {} components",
        siz.reference_grid_width() - siz.image_horizontal_offset(),
        siz.reference_grid_height() - siz.image_vertical_offset(),
        index.no_components()
    );
    println!(
        "tiles:         {} ({}x{})",
        index.no_tiles(),
        siz.num_x_tiles(),
        siz.num_y_tiles()
    );
    println!(
        "coding:        {} levels, {} layers, {:?}",
        index.levels(),
        index.layers(),
        index.main_header.cod.progression_order()
    );
    println!(
        "main header:   {} bytes",
        index.main_header_length()
    );
    let tile_parts: usize = (0..index.no_tiles())
        .map(|t| index.tile_part_count(t))
        .sum();
    println!("tile-parts:    {}", tile_parts);
    println!(
        "precincts:     {}",
        if index.precincts.is_some() {
            "indexed"
        } else {
            "not indexed"
        }
    );
    println!(
        "index source:  {}",
        if index.from_index_box {
            "codestream index box"
        } else {
            "codestream scan"
        }
    );
    println!("metadata-bins: {}", index.metadata.len());
}

fn run() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let opts: Opts = Opts::parse();

    match opts.subcommand {
        SubCommand::Index(c) => {
            let target = open_target(&c.path)?;
            print_index(&target);
        }
        SubCommand::Request(c) => {
            let target = Arc::new(open_target(&c.path)?);

            let mut request = match &c.query {
                Some(query) => {
                    parse_query(query)
                        .map_err(|error| JPIPToolError::Request {
                            error: error.to_string(),
                        })?
                        .request
                }
                None => ViewWindowRequest::default(),
            };
            request.csn = target.csn();
            if let Some(fsiz) = &c.fsiz {
                request.frame_size = Some(pair("fsiz", fsiz)?);
            }
            if let Some(roff) = &c.roff {
                request.region_offset = Some(pair("roff", roff)?);
            }
            if let Some(rsiz) = &c.rsiz {
                request.region_size = Some(pair("rsiz", rsiz)?);
            }
            request.level = c.level.or(request.level);
            request.layers = c.layers.or(request.layers);
            request.max_bytes = c.len.or(request.max_bytes);

            let mut channel = Channel::new(String::new(), 0, Transport::Http, target);
            let mut writer = BufWriter::new(File::create(&c.output)?);
            let reason = channel
                .respond(&request, None, &mut writer)
                .map_err(|error| JPIPToolError::Request {
                    error: error.to_string(),
                })?;
            writer.flush()?;
            info!("response written to {}, {:?}", c.output, reason);
        }
        SubCommand::Reconstruct(c) => {
            let bytes = fs::read(&c.path)?;
            let mut parser = StreamParser::new();
            let parsed = parser
                .feed(&bytes)
                .and_then(|_| parser.finish())
                .map_err(|error| JPIPToolError::ParsingStream {
                    error: error.to_string(),
                });
            if let Err(error) = parsed {
                // A truncated tail still leaves every complete message usable.
                warn!("{}", error);
            }

            let (stream, queue) = parser.into_parts();
            let reconstruction = if c.jp2 {
                reconstruct_jp2(&stream, &queue, c.csn, c.level, &LogSink)
            } else {
                reconstruct_j2k(&stream, &queue, c.csn, c.level, &LogSink)
            }
            .map_err(|error| JPIPToolError::Reconstructing {
                error: error.to_string(),
            })?;
            if !reconstruction.is_complete() {
                warn!(
                    "tiles {:?} were not delivered and are left empty",
                    reconstruction.missing_tiles
                );
            }
            fs::write(&c.output, &reconstruction.data)?;
        }
        SubCommand::Wrap(c) => {
            let source = FileSource::open(&c.path)?;
            let bytes =
                write_indexed_jp2(&source, &LogSink).map_err(|error| JPIPToolError::OpeningTarget {
                    error: error.to_string(),
                })?;
            fs::write(&c.output, &bytes)?;
            info!("{} bytes written to {}", bytes.len(), c.output);
        }
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    match run() {
        Err(e) => Err(e.to_string().into()),
        Ok(_) => Ok(()),
    }
}
