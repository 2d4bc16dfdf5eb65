use quick_error::quick_error;
use std::io::Error as IOError;

quick_error! {
    /// Error type for all error variants originated by this crate.
    #[derive(Debug)]
    pub enum MapperError {
        /// Input data matches neither the vertex-space nor the voxel-space layout.
        ShapeMismatch(expected: String, actual: Vec<usize>) {
            display("Shape mismatch: expected {}, got {:?}", expected, actual)
        }

        /// A vertex index passed to a backward projection is out of range.
        InvalidVertexIndex(index: usize, nverts: usize) {
            display("Invalid vertex index {} for {} vertices", index, nverts)
        }

        /// Cache archive is missing fields or holds an inconsistent sparse matrix.
        InvalidCacheArchive(msg: String) {
            display("Invalid operator cache archive: {}", msg)
        }

        /// The requested projection kernel is not available.
        Unimplemented(kernel: String) {
            display("Projection kernel '{}' is not implemented", kernel)
        }

        InvalidGeometry(msg: String) {
            display("Invalid geometry: {}", msg)
        }

        /// A surface/volume database collaborator failed.
        Database(msg: String) {
            display("Database error: {}", msg)
        }

        /// I/O Error
        Io(err: IOError) {
            from()
            source(err)
        }
    }
}

/// Alias type for results originated from this crate.
pub type Result<T> = ::std::result::Result<T, MapperError>;
