pub mod classifier;

pub use classifier::{
    ATTACK_THRESHOLD,
    Inference,
    MultiResult,
    NidsModel,
    ClassifierHandles,
    load_label_vector,
    spawn_classifier,
};
