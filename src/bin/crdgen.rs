use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!(
        "{}",
        serde_yaml::to_string(&bookstore_operator::resources::Book::crd())?
    );
    Ok(())
}
