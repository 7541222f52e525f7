use ykit_transport_pcsc::{Context, PcscConfig, Scope, list_readers as pcsc_readers};

/// Print the readers PC/SC knows about
pub(crate) fn list_readers(filter: Option<&str>) -> anyhow::Result<()> {
    let context = Context::establish(Scope::User)?;
    let config = filter.map_or_else(PcscConfig::new, |f| PcscConfig::new().with_reader_filter(f));
    let readers: Vec<_> = pcsc_readers(&context)?
        .into_iter()
        .filter(|r| config.accepts_reader(r.name()))
        .collect();

    if readers.is_empty() {
        println!("No readers found!");
        return Ok(());
    }

    println!("Available readers:");
    for (i, reader) in readers.iter().enumerate() {
        let status = match reader.atr() {
            Some(atr) => format!("key present, ATR {}", hex::encode_upper(atr)),
            None => "no key".to_owned(),
        };
        println!("{}. {} ({status})", i + 1, reader.name());
    }

    Ok(())
}
