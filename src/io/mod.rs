mod origin;
mod s3_origin;

pub use origin::OriginStore;
pub use s3_origin::S3OriginStore;
