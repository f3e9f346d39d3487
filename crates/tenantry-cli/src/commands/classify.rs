//! `tenantry classify` command implementation.

use tenantry_policy::Classifier;

pub fn run(entities: &[String]) {
    let classifier = Classifier::builtin();
    let width = entities.iter().map(String::len).max().unwrap_or(0);
    for entity in entities {
        println!("{:width$}  {}", entity, classifier.classify(entity), width = width);
    }
}
