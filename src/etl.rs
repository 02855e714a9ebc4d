pub mod build_graph;
pub mod draw_graph;
pub mod export_csv;
pub mod export_svg;
pub mod parse_osm;

use std::{fs::{self, File}, io::{Read, Write}, path::Path};
use log::{info, error};
use rkyv::{bytecheck::CheckBytes, de::deserializers::SharedDeserializeMap, ser::serializers::AllocSerializer, validation::validators::DefaultValidator, AlignedVec};

use crate::errors::Result;


pub trait Etl {
    type Input;
    type Output;

    fn etl_name(&self) -> &str;
    fn output_file_name(&self) -> &str;

    fn extract(&mut self, dir: &Path) -> Result<Self::Input>;
    fn transform(&mut self, input: Self::Input) -> Result<Self::Output>;
    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()>;

    fn is_cached(&self, dir: &Path) -> Result<bool> {
        Ok(dir.join(self.output_file_name()).try_exists()?)
    }

    fn clean(&self, dir: &Path) -> Result<()> {
        if self.is_cached(dir)? {
            fs::remove_file(dir.join(self.output_file_name()))?;
        }
        Ok(())
    }

    fn process(&mut self, dir: &Path) -> Result<()> {
        info!(etl_name = self.etl_name(); "Starting ETL process");
        if self.is_cached(dir)? {
            info!(etl_name = self.etl_name(); "Using cached value");
        } else {
            info!(etl_name = self.etl_name(); "Extracting");
            let input = match self.extract(dir) {
                Ok(input) => Ok(input),
                Err(err) => {
                    error!(etl_name = self.etl_name(), err = err.message.as_str(); "Extraction failed with error");
                    Err(err)
                },
            }?;

            info!(etl_name = self.etl_name(); "Transforming");
            let output = match self.transform(input) {
                Ok(output) => Ok(output),
                Err(err) => {
                    error!(etl_name = self.etl_name(), err = err.message.as_str(); "Transformation failed with error");
                    Err(err)
                },
            }?;

            info!(etl_name = self.etl_name(); "Loading");
            match self.load(dir, output) {
                Ok(_) => Ok(()),
                Err(err) => {
                    error!(etl_name = self.etl_name(), err = err.message.as_str(); "Loading failed with error");
                    // A half written output would be picked up as cached next time.
                    if let Err(clean_err) = self.clean(dir) {
                        error!(etl_name = self.etl_name(), err = clean_err.message.as_str(); "Could not remove partial output");
                    }
                    Err(err)
                },
            }?;
        }
        info!(etl_name = self.etl_name(); "Process finished");
        Ok(())
    }
}

/// Reads a value previously stored with [`write_cache`]. The archive is
/// validated first, so a cache written by a build with a different layout is
/// rejected instead of misread.
pub fn read_cache<T>(path: &Path) -> Result<T>
where
    T: rkyv::Archive,
    T::Archived: 'static
        + for<'a> CheckBytes<DefaultValidator<'a>>
        + rkyv::Deserialize<T, SharedDeserializeMap>,
{
    let mut input_file = File::open(path)
        .map_err(|err| format!("Could not open cache {}: {}", path.display(), err))?;

    let mut buf_vec: Vec<u8> = Vec::new();
    input_file.read_to_end(&mut buf_vec)?;
    let mut aligned = AlignedVec::with_capacity(buf_vec.len());
    aligned.extend_from_slice(&buf_vec);

    let value = rkyv::from_bytes::<T>(&aligned).map_err(|err| {
        format!("Could not deserialize cache {} (delete it to rebuild): {}", path.display(), err)
    })?;
    Ok(value)
}

pub fn write_cache<T>(path: &Path, value: &T) -> Result<()>
where
    T: rkyv::Serialize<AllocSerializer<256>>,
{
    let bytes = rkyv::to_bytes::<_, 256>(value)
        .map_err(|err| format!("Could not serialize cache {}: {:?}", path.display(), err))?;
    let mut output_file = File::create(path)?;
    output_file.write_all(&bytes)?;
    Ok(())
}
