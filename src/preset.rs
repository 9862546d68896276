use crate::filelist::FileList;

use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};

/// How a preset turns N inputs into one output. Each variant maps to one
/// plan builder in `build_plan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatStrategy {
    /// Single invocation over a `concat:` pseudo-URL. Stream copy only;
    /// inputs must share codec parameters byte-for-byte.
    Protocol,
    /// Single invocation, one `-i` per file, concat filter graph plus
    /// re-encode. Tolerates heterogeneous inputs.
    Filter,
    /// Single invocation over a temporary concat-demuxer list file. Stream
    /// copy without command-line length limits.
    Demux,
    /// One remux process per input writing MPEG-TS into a named pipe, all
    /// concurrent, plus a serial finalize process reading the joined pipes.
    RemuxPipeline,
}

impl ConcatStrategy {
    pub fn describe(self) -> &'static str {
        match self {
            ConcatStrategy::Protocol => "concat protocol",
            ConcatStrategy::Filter => "concat filter",
            ConcatStrategy::Demux => "concat demuxer",
            ConcatStrategy::RemuxPipeline => "parallel remux + concat protocol",
        }
    }
}

/// One named entry of the encoding catalog. Immutable for the run.
pub struct Preset {
    pub strategy: ConcatStrategy,
    pub decode_params: &'static [&'static str],
    pub video_params: &'static [&'static str],
    pub audio_params: &'static [&'static str],
    pub filters: &'static [&'static str],
    pub description: &'static str,
}

impl Preset {
    pub fn encode_params_display(&self) -> String {
        self.decode_params
            .iter()
            .chain(self.video_params)
            .chain(self.audio_params)
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub const PRESETS: &[(&str, Preset)] = &[
    (
        "copy",
        Preset {
            strategy: ConcatStrategy::Demux,
            decode_params: &[],
            video_params: &["-c", "copy"],
            audio_params: &[],
            filters: &[],
            description: "Directly copy input to output. Uses the concat demuxer to concatenate \
                          without re-encoding. Only suited for concatenating files with the exact \
                          same codecs and parameters (e.g. scenes from a camera).",
        },
    ),
    (
        "copydv",
        Preset {
            strategy: ConcatStrategy::Protocol,
            decode_params: &[],
            video_params: &["-c", "copy"],
            audio_params: &[],
            filters: &[],
            description: "Directly copy input to output. Only suited for MPEG-2 (includes DV) \
                          files with equal codec properties due to use of the concatenation \
                          protocol.",
        },
    ),
    (
        "1080p",
        Preset {
            strategy: ConcatStrategy::Filter,
            decode_params: &[],
            video_params: &[
                "-c:v", "libx264", "-crf", "28", "-preset", "medium",
                "-b:v", "2500k", "-maxrate:v", "5000k", "-profile:v", "high", "-level:v", "4.1",
            ],
            audio_params: &["-c:a", "flac", "-strict", "-2"],
            filters: &["scale=-1:1080"],
            description: "Transcode to 1080p using libx264 with a CRF of 28, bit rate 2.5-5Mbps \
                          and FLAC audio. Not by any means perfect video quality, mainly meant \
                          for streaming. Suited for any input format.",
        },
    ),
    (
        "4k",
        Preset {
            strategy: ConcatStrategy::Filter,
            decode_params: &[],
            video_params: &[
                "-c:v", "libx264", "-crf", "28", "-preset", "medium",
                "-b:v", "7500k", "-maxrate:v", "15000k", "-profile:v", "high", "-level:v", "4.1",
            ],
            audio_params: &["-c:a", "flac", "-strict", "-2"],
            filters: &["scale=-1:2160"],
            description: "Transcode to 4k UHD using libx264 with a CRF of 28, bit rate \
                          7.5-15Mbps and FLAC audio. Not by any means perfect video quality, \
                          mainly meant for streaming. Suited for any input format.",
        },
    ),
    (
        "nvenc1080p",
        Preset {
            strategy: ConcatStrategy::Filter,
            decode_params: &[],
            video_params: &[
                "-c:v", "h264_nvenc", "-rc:v", "vbr", "-cq:v", "28",
                "-b:v", "2500k", "-maxrate:v", "5000k", "-profile:v", "high", "-level:v", "4.1",
            ],
            audio_params: &["-c:a", "aac", "-b:a", "128k"],
            filters: &["scale=-1:1080"],
            description: "Transcode to 1080p HD using NVENC h264 with a CQ of 28, bit rate \
                          2.5-5Mbps and AAC audio. NOTE: ONLY available with NVidia cards and an \
                          ffmpeg build with NVENC support.",
        },
    ),
    (
        "nvenc4k",
        Preset {
            strategy: ConcatStrategy::Filter,
            decode_params: &[],
            video_params: &[
                "-c:v", "h264_nvenc", "-rc:v", "vbr", "-cq:v", "28",
                "-b:v", "7500k", "-maxrate:v", "15000k", "-profile:v", "high", "-level:v", "4.1",
            ],
            audio_params: &["-c:a", "aac", "-b:a", "128k"],
            filters: &["scale=-1:2160"],
            description: "Transcode to 4k UHD using NVENC h264 with a CQ of 28, bit rate \
                          7.5-15Mbps and AAC audio. NOTE: ONLY available with NVidia cards and an \
                          ffmpeg build with NVENC support.",
        },
    ),
    (
        "tsremux",
        Preset {
            strategy: ConcatStrategy::RemuxPipeline,
            decode_params: &[],
            video_params: &["-c", "copy", "-bsf:v", "h264_mp4toannexb"],
            audio_params: &[],
            filters: &[],
            description: "Remux every input to an MPEG-TS named pipe concurrently, then \
                          stream-copy the joined pipes into the output. No re-encoding; inputs \
                          must share codec parameters. Unix only.",
        },
    ),
    (
        "nvencremux",
        Preset {
            strategy: ConcatStrategy::RemuxPipeline,
            decode_params: &["-hwaccel", "cuda"],
            video_params: &["-c:v", "h264_nvenc", "-preset:v", "p5", "-cq:v", "28"],
            audio_params: &["-c:a", "aac", "-b:a", "128k"],
            filters: &[],
            description: "Transcode every input to an MPEG-TS named pipe concurrently on the \
                          GPU, then stream-copy the joined pipes into the output. NOTE: ONLY \
                          available with NVidia cards and an ffmpeg build with NVENC support. \
                          Unix only.",
        },
    ),
];

pub fn find_preset(name: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|(n, _)| *n == name).map(|(_, p)| p)
}

pub fn preset_names() -> Vec<&'static str> {
    PRESETS.iter().map(|(n, _)| *n).collect()
}

/// One external-process invocation, fully resolved.
pub struct CommandSpec {
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.program.display())?;
        for arg in &self.args {
            write!(f, " '{}'", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Commands to run plus the scratch resources they reference. The scratch
/// files live exactly as long as the plan; dropping it (on any exit path)
/// removes them.
pub struct ExecutionPlan {
    pub parallel: Vec<CommandSpec>,
    pub serial: Vec<CommandSpec>,
    scratch: Scratch,
}

/// Held purely for `Drop`: deleting the plan deletes its temp files.
#[derive(Default)]
struct Scratch {
    _list_file: Option<NamedTempFile>,
    _fifo_dir: Option<TempDir>,
}

/// The selector: a pure mapping from the preset's strategy tag to one of
/// the four plan builders.
pub fn build_plan(
    preset: &Preset,
    files: &FileList,
    ffmpeg: &Path,
    output: &Path,
) -> Result<ExecutionPlan> {
    if files.is_empty() {
        bail!("nothing to concatenate");
    }
    match preset.strategy {
        ConcatStrategy::Protocol => build_protocol_plan(preset, files, ffmpeg, output),
        ConcatStrategy::Filter => build_filter_plan(preset, files, ffmpeg, output),
        ConcatStrategy::Demux => build_demux_plan(preset, files, ffmpeg, output),
        ConcatStrategy::RemuxPipeline => build_remux_plan(preset, files, ffmpeg, output),
    }
}

fn push_strs(args: &mut Vec<OsString>, strs: &[&str]) {
    args.extend(strs.iter().map(OsString::from));
}

fn concat_url<'a>(inputs: impl Iterator<Item = &'a Path>) -> OsString {
    let mut url = OsString::from("concat:");
    for (i, path) in inputs.enumerate() {
        if i > 0 {
            url.push("|");
        }
        url.push(path.as_os_str());
    }
    url
}

fn build_protocol_plan(
    preset: &Preset,
    files: &FileList,
    ffmpeg: &Path,
    output: &Path,
) -> Result<ExecutionPlan> {
    let mut args = Vec::new();
    push_strs(&mut args, preset.decode_params);
    args.push("-i".into());
    args.push(concat_url(files.paths().iter().map(PathBuf::as_path)));
    push_strs(&mut args, preset.video_params);
    push_strs(&mut args, preset.audio_params);
    args.push("-y".into());
    args.push(output.into());

    Ok(ExecutionPlan {
        parallel: vec![CommandSpec {
            label: "concat".to_string(),
            program: ffmpeg.to_path_buf(),
            args,
        }],
        serial: Vec::new(),
        scratch: Scratch::default(),
    })
}

fn build_filter_plan(
    preset: &Preset,
    files: &FileList,
    ffmpeg: &Path,
    output: &Path,
) -> Result<ExecutionPlan> {
    let mut args = Vec::new();
    push_strs(&mut args, preset.decode_params);
    for path in files.paths() {
        args.push("-i".into());
        args.push(path.into());
    }

    let chain = if preset.filters.is_empty() {
        "null".to_string()
    } else {
        preset.filters.join(",")
    };
    let graph = format!(
        "concat=n={}:v=1:a=1[catv][outa];[catv]{}[outv]",
        files.len(),
        chain
    );
    args.push("-filter_complex".into());
    args.push(graph.into());
    push_strs(&mut args, &["-map", "[outv]", "-map", "[outa]"]);
    push_strs(&mut args, preset.video_params);
    push_strs(&mut args, preset.audio_params);
    args.push("-y".into());
    args.push(output.into());

    Ok(ExecutionPlan {
        parallel: vec![CommandSpec {
            label: "concat".to_string(),
            program: ffmpeg.to_path_buf(),
            args,
        }],
        serial: Vec::new(),
        scratch: Scratch::default(),
    })
}

fn build_demux_plan(
    preset: &Preset,
    files: &FileList,
    ffmpeg: &Path,
    output: &Path,
) -> Result<ExecutionPlan> {
    let mut list_file = NamedTempFile::new().context("cannot create concat list file")?;
    for path in files.paths() {
        // The demuxer wants forward slashes regardless of host convention.
        let normalized = path.to_string_lossy().replace('\\', "/");
        writeln!(list_file, "file 'file:{}'", normalized)?;
    }
    list_file.flush()?;

    let mut args = Vec::new();
    push_strs(&mut args, preset.decode_params);
    push_strs(&mut args, &["-f", "concat", "-safe", "0", "-i"]);
    args.push(list_file.path().into());
    push_strs(&mut args, preset.video_params);
    push_strs(&mut args, preset.audio_params);
    args.push("-y".into());
    args.push(output.into());

    Ok(ExecutionPlan {
        parallel: vec![CommandSpec {
            label: "concat".to_string(),
            program: ffmpeg.to_path_buf(),
            args,
        }],
        serial: Vec::new(),
        scratch: Scratch {
            _list_file: Some(list_file),
            ..Scratch::default()
        },
    })
}

#[cfg(unix)]
fn build_remux_plan(
    preset: &Preset,
    files: &FileList,
    ffmpeg: &Path,
    output: &Path,
) -> Result<ExecutionPlan> {
    use nix::sys::stat::Mode;

    let fifo_dir = tempfile::Builder::new()
        .prefix("scenecat-")
        .tempdir()
        .context("cannot create scratch directory for named pipes")?;

    // Each writer gets an equal share of the cores so N concurrent encoders
    // don't all grab every core.
    let threads = (num_cpus::get().max(1) / files.len().max(1)).max(1);

    let mut parallel = Vec::with_capacity(files.len());
    let mut fifos = Vec::with_capacity(files.len());
    for (i, path) in files.paths().iter().enumerate() {
        let fifo = fifo_dir.path().join(format!("scene{:04}.ts", i));
        nix::unistd::mkfifo(&fifo, Mode::S_IRUSR | Mode::S_IWUSR)
            .with_context(|| format!("cannot create named pipe {}", fifo.display()))?;

        let mut args = Vec::new();
        push_strs(&mut args, preset.decode_params);
        args.push("-i".into());
        args.push(path.into());
        push_strs(&mut args, preset.video_params);
        push_strs(&mut args, preset.audio_params);
        args.push("-threads".into());
        args.push(threads.to_string().into());
        push_strs(&mut args, &["-f", "mpegts", "-y"]);
        args.push(fifo.clone().into());

        parallel.push(CommandSpec {
            label: format!("remux scene{:04}", i),
            program: ffmpeg.to_path_buf(),
            args,
        });
        fifos.push(fifo);
    }

    // The finalize step can be enqueued right away: reading a FIFO blocks
    // until its writer attaches, so no readiness signaling is needed.
    let mut args = vec![OsString::from("-i"), concat_url(fifos.iter().map(PathBuf::as_path))];
    push_strs(&mut args, &["-c", "copy", "-y"]);
    args.push(output.into());
    let serial = vec![CommandSpec {
        label: "finalize".to_string(),
        program: ffmpeg.to_path_buf(),
        args,
    }];

    Ok(ExecutionPlan {
        parallel,
        serial,
        scratch: Scratch {
            _fifo_dir: Some(fifo_dir),
            ..Scratch::default()
        },
    })
}

#[cfg(not(unix))]
fn build_remux_plan(
    _preset: &Preset,
    _files: &FileList,
    _ffmpeg: &Path,
    _output: &Path,
) -> Result<ExecutionPlan> {
    bail!("the remux pipeline needs named pipes, which this platform does not provide; pick another preset");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MetaCache;
    use crate::meta::FileMeta;
    use std::fs;

    fn listed(dir: &Path, names: &[&str]) -> FileList {
        let mut cache = MetaCache::new();
        let mut list = FileList::new();
        for name in names {
            let path = dir.join(name);
            fs::write(&path, b"x").unwrap();
            list.add_file(&path, &mut cache, |_| Ok(FileMeta::default()))
                .unwrap();
        }
        list
    }

    fn args_lossy(spec: &CommandSpec) -> Vec<String> {
        spec.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn protocol_plan_is_one_invocation_with_joined_input() {
        let dir = tempfile::tempdir().unwrap();
        let list = listed(dir.path(), &["a.mp4", "b.mp4"]);
        let preset = find_preset("copydv").unwrap();
        let plan = build_plan(preset, &list, Path::new("ffmpeg"), Path::new("/tmp/out.mp4"))
            .unwrap();

        assert_eq!(plan.parallel.len(), 1);
        assert!(plan.serial.is_empty());
        let args = args_lossy(&plan.parallel[0]);
        let input = &args[args.iter().position(|a| a == "-i").unwrap() + 1];
        assert!(input.starts_with("concat:"));
        let a = list.paths()[0].to_string_lossy().into_owned();
        let b = list.paths()[1].to_string_lossy().into_owned();
        assert_eq!(*input, format!("concat:{}|{}", a, b));
    }

    #[test]
    fn filter_plan_builds_concat_graph_over_all_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let list = listed(dir.path(), &["a.mp4", "b.mp4", "c.mp4"]);
        let preset = find_preset("1080p").unwrap();
        let plan = build_plan(preset, &list, Path::new("ffmpeg"), Path::new("/tmp/out.mkv"))
            .unwrap();

        assert_eq!(plan.parallel.len(), 1);
        let args = args_lossy(&plan.parallel[0]);
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 3);
        let graph_pos = args.iter().position(|a| a == "-filter_complex").unwrap();
        let graph = &args[graph_pos + 1];
        assert!(graph.starts_with("concat=n=3:v=1:a=1[catv][outa];[catv]scale=-1:1080[outv]"));
        assert!(args.contains(&"[outv]".to_string()));
        assert!(args.contains(&"[outa]".to_string()));
    }

    #[test]
    fn demux_plan_writes_normalized_list_file() {
        let dir = tempfile::tempdir().unwrap();
        let list = listed(dir.path(), &["b.mp4", "a.mp4"]);
        let preset = find_preset("copy").unwrap();
        let plan = build_plan(preset, &list, Path::new("ffmpeg"), Path::new("/tmp/out.mp4"))
            .unwrap();

        let args = args_lossy(&plan.parallel[0]);
        let list_path = args[args.iter().position(|a| a == "-i").unwrap() + 1].clone();
        let contents = fs::read_to_string(&list_path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        // Insertion order, not sorted.
        assert_eq!(
            lines[0],
            format!("file 'file:{}'", list.paths()[0].to_string_lossy())
        );
        assert!(!contents.contains('\\'));
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "concat"));

        // Dropping the plan removes the list file.
        drop(plan);
        assert!(!Path::new(&list_path).exists());
    }

    #[cfg(unix)]
    #[test]
    fn remux_plan_has_one_writer_per_input_plus_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let list = listed(dir.path(), &["a.mp4", "b.mp4", "c.mp4"]);
        let preset = find_preset("tsremux").unwrap();
        let plan = build_plan(preset, &list, Path::new("ffmpeg"), Path::new("/tmp/out.mp4"))
            .unwrap();

        assert_eq!(plan.parallel.len(), 3);
        assert_eq!(plan.serial.len(), 1);

        // Every writer's FIFO exists already and feeds the finalize input.
        let finalize = args_lossy(&plan.serial[0]);
        let input = &finalize[finalize.iter().position(|a| a == "-i").unwrap() + 1];
        assert!(input.starts_with("concat:"));
        let mut fifo_dir = None;
        for spec in &plan.parallel {
            let fifo = PathBuf::from(spec.args.last().unwrap());
            assert!(fifo.exists(), "missing fifo {}", fifo.display());
            assert!(input.contains(&*fifo.to_string_lossy()));
            fifo_dir = fifo.parent().map(Path::to_path_buf);
        }

        // Dropping the plan removes the scratch directory and its pipes.
        let fifo_dir = fifo_dir.unwrap();
        drop(plan);
        assert!(!fifo_dir.exists());
    }

    #[test]
    fn empty_file_list_is_rejected() {
        let list = FileList::new();
        let preset = find_preset("copy").unwrap();
        assert!(build_plan(preset, &list, Path::new("ffmpeg"), Path::new("/tmp/o.mp4")).is_err());
    }

    #[test]
    fn catalog_lookup_and_names() {
        assert!(find_preset("copy").is_some());
        assert!(find_preset("betamax").is_none());
        assert_eq!(preset_names()[0], "copy");
    }
}
