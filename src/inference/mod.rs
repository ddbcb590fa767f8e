pub mod ct;
pub mod metaimage;

pub use ct::{
    attenuation_to_hu, generate_ct, run_inference, CtGeometry, MIN_HU, MU_AIR, MU_WATER,
};
pub use metaimage::{read_metaimage, write_metaimage, CtImage, IDENTITY_DIRECTION};
