//! Loader for the packed shader container.
//!
//! ```text
//! [i32 backend discriminator]
//! [i32 layout length][layout bytes]
//! [i32 stage count]
//! { [i32 name length][name bytes][i32 blob length][blob bytes] } x stage count
//! ```
//!
//! All integers are little endian. The layout blob is a serialized root
//! signature on Direct3D 12 and a pipeline-layout description on Vulkan.

use super::error::{GPUError, Result};

pub const AMPLIFICATION_ENTRY: &str = "AmplificationMain";
pub const MESH_ENTRY: &str = "MeshMain";
pub const PIXEL_ENTRY: &str = "PixelMain";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Amplification,
    /// Mesh shader, or vertex shader on devices without mesh shading.
    Mesh,
    Pixel,
    Compute,
}

/// Which stages a loaded shader carries.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ShaderStages {
    pub amplification: bool,
    pub mesh: bool,
    pub pixel: bool,
    pub compute: bool,
}

impl ShaderStages {
    pub fn is_compute(&self) -> bool {
        self.compute
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShaderContainer {
    pub backend_discriminator: i32,
    pub layout: Vec<u8>,
    pub amplification: Option<Vec<u8>>,
    pub mesh: Option<Vec<u8>>,
    pub pixel: Option<Vec<u8>>,
    pub compute: Option<Vec<u8>>,
    /// Entry point name the compute blob was stored under.
    pub compute_entry_point: Option<String>,
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn read_i32(&mut self, what: &str) -> Result<i32> {
        if self.bytes.len() < 4 {
            return Err(GPUError::MalformedShaderContainer(format!(
                "truncated before {what}"
            )));
        }
        let (head, tail) = self.bytes.split_at(4);
        self.bytes = tail;
        Ok(i32::from_le_bytes([head[0], head[1], head[2], head[3]]))
    }

    fn read_len(&mut self, what: &str) -> Result<usize> {
        let len = self.read_i32(what)?;
        usize::try_from(len).map_err(|_| {
            GPUError::MalformedShaderContainer(format!("negative {what} ({len})"))
        })
    }

    fn read_blob(&mut self, what: &str) -> Result<&'a [u8]> {
        let len = self.read_len(what)?;
        if self.bytes.len() < len {
            return Err(GPUError::MalformedShaderContainer(format!(
                "{what} of {len} bytes runs past the end of the container"
            )));
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Ok(head)
    }
}

impl ShaderContainer {
    /// Parses a container. `compute_entry_point` names the stage that holds
    /// compute bytecode, if the caller expects one.
    pub fn parse(bytes: &[u8], compute_entry_point: Option<&str>) -> Result<Self> {
        let mut reader = Reader { bytes };
        let mut container = ShaderContainer {
            backend_discriminator: reader.read_i32("backend discriminator")?,
            ..Default::default()
        };
        container.layout = reader.read_blob("layout length")?.to_vec();

        let stage_count = reader.read_len("stage count")?;
        for _ in 0..stage_count {
            let name = reader.read_blob("stage name length")?;
            let name = std::str::from_utf8(name).map_err(|_| {
                GPUError::MalformedShaderContainer("stage name is not valid UTF-8".into())
            })?;
            let blob = reader.read_blob("stage blob length")?;

            let slot = match name {
                AMPLIFICATION_ENTRY => &mut container.amplification,
                MESH_ENTRY => &mut container.mesh,
                PIXEL_ENTRY => &mut container.pixel,
                n if Some(n) == compute_entry_point => &mut container.compute,
                other => {
                    return Err(GPUError::MalformedShaderContainer(format!(
                        "unrecognized stage `{other}`"
                    )))
                }
            };

            if slot.is_some() {
                return Err(GPUError::MalformedShaderContainer(format!(
                    "stage `{name}` appears twice"
                )));
            }
            *slot = Some(blob.to_vec());
        }

        if !reader.bytes.is_empty() {
            return Err(GPUError::MalformedShaderContainer(format!(
                "{} trailing bytes",
                reader.bytes.len()
            )));
        }

        if container.compute.is_some() {
            container.compute_entry_point = compute_entry_point.map(str::to_owned);
        }
        container.validate()?;
        Ok(container)
    }

    fn validate(&self) -> Result<()> {
        let has_graphics =
            self.amplification.is_some() || self.mesh.is_some() || self.pixel.is_some();

        if self.compute.is_some() {
            if has_graphics {
                return Err(GPUError::MalformedShaderContainer(
                    "container mixes compute and graphics stages".into(),
                ));
            }
            return Ok(());
        }

        if self.mesh.is_none() {
            return Err(GPUError::MissingShaderStage(MESH_ENTRY));
        }
        if self.pixel.is_none() {
            return Err(GPUError::MissingShaderStage(PIXEL_ENTRY));
        }
        Ok(())
    }

    /// Serializes the container. Stages are written in the order
    /// amplification, mesh, pixel, compute.
    pub fn encode(&self) -> Vec<u8> {
        fn put_blob(out: &mut Vec<u8>, bytes: &[u8]) {
            out.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
            out.extend_from_slice(bytes);
        }

        let compute_name = self.compute_entry_point.as_deref().unwrap_or("main");
        let stages: Vec<(&str, &[u8])> = [
            (AMPLIFICATION_ENTRY, self.amplification.as_deref()),
            (MESH_ENTRY, self.mesh.as_deref()),
            (PIXEL_ENTRY, self.pixel.as_deref()),
            (compute_name, self.compute.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, blob)| blob.map(|b| (name, b)))
        .collect();

        let mut out = Vec::new();
        out.extend_from_slice(&self.backend_discriminator.to_le_bytes());
        put_blob(&mut out, &self.layout);
        out.extend_from_slice(&(stages.len() as i32).to_le_bytes());
        for (name, blob) in stages {
            put_blob(&mut out, name.as_bytes());
            put_blob(&mut out, blob);
        }
        out
    }

    pub fn stages(&self) -> ShaderStages {
        ShaderStages {
            amplification: self.amplification.is_some(),
            mesh: self.mesh.is_some(),
            pixel: self.pixel.is_some(),
            compute: self.compute.is_some(),
        }
    }

    pub fn stage(&self, stage: ShaderStage) -> Option<&[u8]> {
        match stage {
            ShaderStage::Amplification => self.amplification.as_deref(),
            ShaderStage::Mesh => self.mesh.as_deref(),
            ShaderStage::Pixel => self.pixel.as_deref(),
            ShaderStage::Compute => self.compute.as_deref(),
        }
    }

    /// Entry-point name of a stage, as stored in the container.
    pub fn entry_point(&self, stage: ShaderStage) -> &str {
        match stage {
            ShaderStage::Amplification => AMPLIFICATION_ENTRY,
            ShaderStage::Mesh => MESH_ENTRY,
            ShaderStage::Pixel => PIXEL_ENTRY,
            ShaderStage::Compute => self.compute_entry_point.as_deref().unwrap_or("main"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graphics() -> ShaderContainer {
        ShaderContainer {
            backend_discriminator: 8,
            layout: vec![1, 2, 3],
            mesh: Some(vec![0xAA; 12]),
            pixel: Some(vec![0xBB; 7]),
            ..Default::default()
        }
    }

    #[test]
    fn encoded_layout_is_bit_exact() {
        let bytes = ShaderContainer {
            backend_discriminator: 1,
            layout: vec![9],
            compute: Some(vec![7, 7]),
            compute_entry_point: Some("CS".into()),
            ..Default::default()
        }
        .encode();

        #[rustfmt::skip]
        let expected: Vec<u8> = vec![
            1, 0, 0, 0,
            1, 0, 0, 0, 9,
            1, 0, 0, 0,
            2, 0, 0, 0, b'C', b'S',
            2, 0, 0, 0, 7, 7,
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn truncated_container_is_rejected() {
        let bytes = graphics().encode();
        for cut in [0, 3, 9, bytes.len() - 1] {
            assert!(matches!(
                ShaderContainer::parse(&bytes[..cut], None),
                Err(GPUError::MalformedShaderContainer(_))
            ));
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = graphics().encode();
        bytes.push(0);
        assert!(ShaderContainer::parse(&bytes, None).is_err());
    }

    #[test]
    fn duplicate_stage_is_rejected() {
        let mut bytes = graphics().encode();
        // Bump the stage count and append a second MeshMain entry.
        let count_at = 4 + 4 + 3;
        bytes[count_at] = 3;
        bytes.extend_from_slice(&(MESH_ENTRY.len() as i32).to_le_bytes());
        bytes.extend_from_slice(MESH_ENTRY.as_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        assert!(matches!(
            ShaderContainer::parse(&bytes, None),
            Err(GPUError::MalformedShaderContainer(_))
        ));
    }

    #[test]
    fn graphics_shader_needs_pixel_stage() {
        let mut container = graphics();
        container.pixel = None;
        assert!(matches!(
            ShaderContainer::parse(&container.encode(), None),
            Err(GPUError::MissingShaderStage(PIXEL_ENTRY))
        ));
    }

    #[test]
    fn compute_stage_uses_caller_entry_point() {
        let container = ShaderContainer {
            layout: vec![],
            compute: Some(vec![5; 4]),
            compute_entry_point: Some("CullMain".into()),
            ..Default::default()
        };
        let bytes = container.encode();

        let parsed = ShaderContainer::parse(&bytes, Some("CullMain")).unwrap();
        assert_eq!(parsed, container);
        assert!(parsed.stages().is_compute());

        // Without the entry point the stage name is unrecognized.
        assert!(ShaderContainer::parse(&bytes, None).is_err());
    }
}
