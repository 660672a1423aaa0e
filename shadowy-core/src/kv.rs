//! Adaptador de armazenamento chave-valor
//!
//! O núcleo é agnóstico ao motor de armazenamento: tudo passa pela
//! interface [`KvStore`] (leitura, escrita atômica, iteração por
//! prefixo). O adaptador de produção é [`SledKv`]; [`MemoryKv`] serve
//! testes e simulações.

use shared::{NodeError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Lote de escritas aplicado atomicamente
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<(Vec<u8>, Vec<u8>)>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Agenda uma escrita no lote
    pub fn set(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push((key.into(), value.into()));
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Consome o lote devolvendo as operações na ordem de inserção
    #[must_use]
    pub fn into_ops(self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.ops
    }

    /// Busca no próprio lote (último valor escrito para a chave)
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.ops
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }
}

/// Interface sobre um banco chave-valor ordenado embutido
pub trait KvStore: Send + Sync {
    /// Lê o valor de uma chave
    ///
    /// # Errors
    ///
    /// Retorna `Io` em falha do motor de armazenamento
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Escreve uma chave; atômico dentro da chamada
    ///
    /// # Errors
    ///
    /// Retorna `Io` em falha do motor de armazenamento
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Aplica um lote inteiro atomicamente
    ///
    /// # Errors
    ///
    /// Retorna `Io` em falha do motor de armazenamento
    fn apply_batch(&self, batch: WriteBatch) -> Result<()>;

    /// Itera pares (chave, valor) em ordem lexicográfica, restritos ao
    /// prefixo. O iterador é de uso único.
    fn scan_prefix<'a>(
        &'a self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + 'a>;

    /// Descarrega escritas pendentes para o disco
    ///
    /// # Errors
    ///
    /// Retorna `Io` em falha do motor de armazenamento
    fn flush(&self) -> Result<()>;
}

fn sled_err(err: &sled::Error) -> NodeError {
    NodeError::Io(err.to_string())
}

/// Adaptador sobre o sled, com trava exclusiva de processo
#[derive(Debug)]
pub struct SledKv {
    db: sled::Db,
    lock_path: PathBuf,
}

impl SledKv {
    /// Abre (ou cria) o banco no diretório dado
    ///
    /// Um arquivo de trava ao lado do banco registra o PID do detentor.
    /// Trava obsoleta apontando para um processo morto é removida;
    /// processo vivo resulta em `LockHeld`.
    ///
    /// # Errors
    ///
    /// Retorna `LockHeld` se outro processo vivo detém a trava, `Io` em
    /// falhas de abertura
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_path = path.with_extension("lock");

        Self::acquire_lock(&lock_path)?;

        let db = sled::open(path).map_err(|e| {
            let _ = std::fs::remove_file(&lock_path);
            sled_err(&e)
        })?;

        Ok(Self {
            db,
            lock_path,
        })
    }

    fn acquire_lock(lock_path: &Path) -> Result<()> {
        if let Ok(contents) = std::fs::read_to_string(lock_path) {
            if let Ok(pid) = contents.trim().parse::<u32>() {
                if pid_alive(pid) {
                    return Err(NodeError::LockHeld(pid));
                }
            }
            // Trava obsoleta
            std::fs::remove_file(lock_path)?;
        }

        std::fs::write(lock_path, std::process::id().to_string())?;
        Ok(())
    }

    /// Fecha o banco, descarregando e liberando a trava
    ///
    /// # Errors
    ///
    /// Retorna `Io` se o flush final falhar
    pub fn close(self) -> Result<()> {
        self.db.flush().map_err(|e| sled_err(&e))?;
        Ok(())
    }
}

impl Drop for SledKv {
    fn drop(&mut self) {
        let _ = self.db.flush();
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    false
}

impl KvStore for SledKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map(|opt| opt.map(|v| v.to_vec()))
            .map_err(|e| sled_err(&e))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.insert(key, value).map_err(|e| sled_err(&e))?;
        Ok(())
    }

    fn apply_batch(&self, batch: WriteBatch) -> Result<()> {
        let mut sled_batch = sled::Batch::default();
        for (key, value) in batch.into_ops() {
            sled_batch.insert(key, value);
        }
        self.db.apply_batch(sled_batch).map_err(|e| sled_err(&e))
    }

    fn scan_prefix<'a>(
        &'a self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + 'a> {
        Box::new(self.db.scan_prefix(prefix).map(|item| {
            item.map(|(k, v)| (k.to_vec(), v.to_vec()))
                .map_err(|e| sled_err(&e))
        }))
    }

    fn flush(&self) -> Result<()> {
        self.db.flush().map_err(|e| sled_err(&e))?;
        Ok(())
    }
}

/// Adaptador em memória para testes
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().expect("kv lock").get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .expect("kv lock")
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn apply_batch(&self, batch: WriteBatch) -> Result<()> {
        let mut entries = self.entries.write().expect("kv lock");
        for (key, value) in batch.into_ops() {
            entries.insert(key, value);
        }
        Ok(())
    }

    fn scan_prefix<'a>(
        &'a self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + 'a> {
        let entries = self.entries.read().expect("kv lock");
        let collected: Vec<_> = entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| Ok((k.clone(), v.clone())))
            .collect();
        Box::new(collected.into_iter())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_kv_roundtrip() {
        let kv = MemoryKv::new();
        kv.set(b"a", b"1").unwrap();
        assert_eq!(kv.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(kv.get(b"b").unwrap(), None);
    }

    #[test]
    fn test_memory_kv_prefix_scan_is_ordered() {
        let kv = MemoryKv::new();
        kv.set(b"utxo:b", b"2").unwrap();
        kv.set(b"utxo:a", b"1").unwrap();
        kv.set(b"tx:z", b"x").unwrap();

        let keys: Vec<_> = kv
            .scan_prefix(b"utxo:")
            .map(|item| item.unwrap().0)
            .collect();
        assert_eq!(keys, vec![b"utxo:a".to_vec(), b"utxo:b".to_vec()]);
    }

    #[test]
    fn test_batch_is_applied_in_order() {
        let kv = MemoryKv::new();
        let mut batch = WriteBatch::new();
        batch.set(b"k".to_vec(), b"first".to_vec());
        batch.set(b"k".to_vec(), b"second".to_vec());
        kv.apply_batch(batch).unwrap();

        assert_eq!(kv.get(b"k").unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn test_sled_open_and_lock() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("kv");

        let kv = SledKv::open(&db_path).unwrap();
        kv.set(b"height", b"0").unwrap();
        assert_eq!(kv.get(b"height").unwrap(), Some(b"0".to_vec()));

        // Segunda abertura pelo mesmo processo vivo falha com LockHeld
        match SledKv::open(&db_path) {
            Err(NodeError::LockHeld(pid)) => assert_eq!(pid, std::process::id()),
            other => panic!("esperava LockHeld, obteve {other:?}"),
        }

        kv.close().unwrap();

        // Após fechar, a trava foi liberada
        let reopened = SledKv::open(&db_path).unwrap();
        assert_eq!(reopened.get(b"height").unwrap(), Some(b"0".to_vec()));
    }

    #[test]
    fn test_stale_lock_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("kv");
        let lock_path = db_path.with_extension("lock");

        // PID quase certamente morto
        std::fs::write(&lock_path, "999999999").unwrap();

        let kv = SledKv::open(&db_path).unwrap();
        kv.set(b"x", b"y").unwrap();
    }
}
