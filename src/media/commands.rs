use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::Result;
use crate::process::{run_captured, CaptureLimits, CommandOutput};

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Copy audio stream
    pub fn copy_audio(self) -> Self {
        self.audio_codec("copy")
    }

    /// Add video filter
    pub fn video_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-vf").arg(filter)
    }

    /// Execute the command, capturing bounded output. Exit status is left to the caller.
    pub async fn execute(&self, timeout: Duration, limits: CaptureLimits) -> Result<CommandOutput> {
        debug!("Executing media command ({}): {} {:?}", self.description, self.binary_path, self.args);
        run_captured(&self.description, &self.binary_path, &self.args, timeout, limits).await
    }
}

/// Builder for the media operations the pipeline needs
pub struct MediaCommandBuilder {
    binary_path: String,
    probe_binary_path: String,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, probe_binary_path: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            probe_binary_path: probe_binary_path.into(),
        }
    }

    /// Build a render command burning `video_filter` into the picture
    pub fn render<P: AsRef<Path>>(
        &self,
        video_path: P,
        video_filter: &str,
        output_path: P,
        additional_options: &[String],
    ) -> MediaCommand {
        let mut cmd = MediaCommand::new(&self.binary_path, "Renderer")
            .overwrite()
            .input(&video_path)
            .video_filter(video_filter)
            .copy_audio();

        // Add user-specified additional options
        for option in additional_options {
            cmd = cmd.arg(option);
        }

        cmd.output(output_path)
    }

    /// Build a stream listing command with JSON output
    pub fn probe_streams<P: AsRef<Path>>(&self, media_path: P) -> MediaCommand {
        MediaCommand::new(&self.probe_binary_path, "Media probe")
            .args(["-v", "error", "-show_entries", "stream=codec_type,width,height", "-of", "json"])
            .output(media_path)
    }

    /// Build version check command
    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Version check").arg("-version")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_command_layout() {
        let builder = MediaCommandBuilder::new("ffmpeg", "ffprobe");
        let options = vec!["-preset".to_string(), "fast".to_string()];
        let cmd = builder.render(Path::new("in.mp4"), "ass=a.ass", Path::new("out.mp4"), &options);

        assert_eq!(cmd.binary_path, "ffmpeg");
        assert_eq!(
            cmd.args,
            vec!["-y", "-i", "in.mp4", "-vf", "ass=a.ass", "-c:a", "copy", "-preset", "fast", "out.mp4"]
        );
    }

    #[test]
    fn test_probe_command_targets_ffprobe() {
        let builder = MediaCommandBuilder::new("ffmpeg", "/opt/ffprobe");
        let cmd = builder.probe_streams("clip.mkv");

        assert_eq!(cmd.binary_path, "/opt/ffprobe");
        assert_eq!(cmd.args.last().map(String::as_str), Some("clip.mkv"));
        assert!(cmd.args.contains(&"stream=codec_type,width,height".to_string()));
    }
}
